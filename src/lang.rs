//! Filename and language-code resolution for subtitle files.
//!
//! Subtitle names follow the `<base>.<code>[.forced][.sdh].srt` convention.
//! Parsing scans dot-separated segments from the right looking for a known
//! language code; building substitutes the configured naming pattern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Display name, ISO 639-1 (or regional) code, ISO 639-2 code.
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("Afrikaans", "af", "afr"),
    ("Albanian", "sq", "sqi"),
    ("Amharic", "am", "amh"),
    ("Arabic", "ar", "ara"),
    ("Armenian", "hy", "hye"),
    ("Azerbaijani", "az", "aze"),
    ("Basque", "eu", "eus"),
    ("Belarusian", "be", "bel"),
    ("Bengali", "bn", "ben"),
    ("Bosnian", "bs", "bos"),
    ("Bulgarian", "bg", "bul"),
    ("Catalan", "ca", "cat"),
    ("Cebuano", "ceb", "ceb"),
    ("Chinese (Simplified)", "zh-CN", "zho"),
    ("Chinese (Traditional)", "zh-TW", "zho"),
    ("Corsican", "co", "cos"),
    ("Croatian", "hr", "hrv"),
    ("Czech", "cs", "ces"),
    ("Danish", "da", "dan"),
    ("Dutch", "nl", "nld"),
    ("English", "en", "eng"),
    ("Estonian", "et", "est"),
    ("Finnish", "fi", "fin"),
    ("French", "fr", "fra"),
    ("Frisian", "fy", "fry"),
    ("Galician", "gl", "glg"),
    ("Georgian", "ka", "kat"),
    ("German", "de", "deu"),
    ("Greek", "el", "ell"),
    ("Gujarati", "gu", "guj"),
    ("Haitian Creole", "ht", "hat"),
    ("Hausa", "ha", "hau"),
    ("Hebrew", "he", "heb"),
    ("Hindi", "hi", "hin"),
    ("Hungarian", "hu", "hun"),
    ("Icelandic", "is", "isl"),
    ("Igbo", "ig", "ibo"),
    ("Indonesian", "id", "ind"),
    ("Italian", "it", "ita"),
    ("Japanese", "ja", "jpn"),
    ("Javanese", "jv", "jav"),
    ("Kannada", "kn", "kan"),
    ("Kazakh", "kk", "kaz"),
    ("Khmer", "km", "khm"),
    ("Korean", "ko", "kor"),
    ("Kurdish", "ku", "kur"),
    ("Kyrgyz", "ky", "kir"),
    ("Lao", "lo", "lao"),
    ("Latvian", "lv", "lav"),
    ("Lithuanian", "lt", "lit"),
    ("Luxembourgish", "lb", "ltz"),
    ("Macedonian", "mk", "mkd"),
    ("Malay", "ms", "msa"),
    ("Malayalam", "ml", "mal"),
    ("Maltese", "mt", "mlt"),
    ("Marathi", "mr", "mar"),
    ("Mongolian", "mn", "mon"),
    ("Myanmar", "my", "mya"),
    ("Nepali", "ne", "nep"),
    ("Norwegian", "no", "nor"),
    ("Pashto", "ps", "pus"),
    ("Persian", "fa", "fas"),
    ("Polish", "pl", "pol"),
    ("Brazilian Portuguese", "pt-BR", "por"),
    ("Portuguese", "pt-PT", "por"),
    ("Punjabi", "pa", "pan"),
    ("Romanian", "ro", "ron"),
    ("Russian", "ru", "rus"),
    ("Samoan", "sm", "smo"),
    ("Serbian", "sr", "srp"),
    ("Sindhi", "sd", "snd"),
    ("Sinhala", "si", "sin"),
    ("Slovak", "sk", "slk"),
    ("Slovenian", "sl", "slv"),
    ("Somali", "so", "som"),
    ("Spanish", "es", "spa"),
    ("Sundanese", "su", "sun"),
    ("Swahili", "sw", "swa"),
    ("Swedish", "sv", "swe"),
    ("Tajik", "tg", "tgk"),
    ("Tamil", "ta", "tam"),
    ("Telugu", "te", "tel"),
    ("Thai", "th", "tha"),
    ("Turkish", "tr", "tur"),
    ("Ukrainian", "uk", "ukr"),
    ("Urdu", "ur", "urd"),
    ("Uzbek", "uz", "uzb"),
    ("Vietnamese", "vi", "vie"),
    ("Xhosa", "xh", "xho"),
    ("Yiddish", "yi", "yid"),
    ("Yoruba", "yo", "yor"),
    ("Zulu", "zu", "zul"),
];

const MODIFIERS: &[&str] = &["forced", "sdh"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov"];

fn code_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut map = HashMap::new();
        for (_, two, three) in LANGUAGES {
            map.insert(*two, *two);
            // Three-letter variants resolve to the primary code. Shared
            // three-letter codes (zho, por) keep the first table entry.
            map.entry(*three).or_insert(*two);
        }
        map
    })
}

/// Map a known 2- or 3-letter variant to its canonical code.
pub fn normalize_language_code(code: &str) -> Option<&'static str> {
    code_map().get(code).copied()
}

/// Human-readable name for a language code, falling back to the uppercased
/// code for anything not in the table.
pub fn language_name(code: &str) -> String {
    for (name, two, _) in LANGUAGES {
        if *two == code {
            return (*name).to_string();
        }
    }
    code.to_uppercase()
}

/// Language code collapsed to its file-name form: regional variants of
/// Chinese and Portuguese share a single tag on disk.
pub fn file_lang_code(code: &str) -> &str {
    if code.starts_with("zh") {
        "zh"
    } else if code.starts_with("pt") {
        "pt"
    } else {
        code
    }
}

/// Components of a subtitle filename, derived on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub base_name: String,
    pub lang_code: Option<String>,
    pub forced: bool,
    pub sdh: bool,
    pub modifiers_string: String,
}

/// Parse a subtitle filename into base name, language code, and modifiers.
///
/// Returns `None` for non-`.srt` names. Segments are scanned right-to-left
/// (never consuming the first segment) for the first one that normalizes to a
/// known code, skipping `forced`/`sdh` tokens. The scan deliberately does not
/// stop at unrecognized segments, so a code left of an unrelated token (e.g.
/// a release tag) is still found.
pub fn parse_subtitle_filename(name: &str) -> Option<ParsedFilename> {
    let stem = name.strip_suffix(".srt").or_else(|| {
        if name.to_lowercase().ends_with(".srt") {
            Some(&name[..name.len() - 4])
        } else {
            None
        }
    })?;

    let parts: Vec<&str> = stem.split('.').collect();
    if parts.len() < 2 {
        return Some(ParsedFilename {
            base_name: stem.to_string(),
            lang_code: None,
            forced: false,
            sdh: false,
            modifiers_string: String::new(),
        });
    }

    let mut lang_code = None;
    let mut lang_index = None;
    for i in (1..parts.len()).rev() {
        let part = parts[i].to_lowercase();
        if MODIFIERS.contains(&part.as_str()) {
            continue;
        }
        if let Some(code) = normalize_language_code(&part) {
            lang_code = Some(code.to_string());
            lang_index = Some(i);
            break;
        }
    }

    let mut parsed = ParsedFilename {
        base_name: stem.to_string(),
        lang_code,
        forced: false,
        sdh: false,
        modifiers_string: String::new(),
    };

    if let Some(index) = lang_index {
        parsed.base_name = parts[..index].join(".");

        let mut valid = Vec::new();
        for part in &parts[index + 1..] {
            let lower = part.to_lowercase();
            if MODIFIERS.contains(&lower.as_str()) {
                match lower.as_str() {
                    "forced" => parsed.forced = true,
                    "sdh" => parsed.sdh = true,
                    _ => {}
                }
                valid.push(lower);
            }
        }
        parsed.modifiers_string = valid.join(".");
    }

    Some(parsed)
}

/// Repeatedly remove trailing dot-segments that are modifiers or recognized
/// language codes. Used when full parsing found no code.
pub fn strip_language_codes_from_name(name: &str) -> String {
    let mut parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 2 {
        return name.to_string();
    }

    while parts.len() > 1 {
        let last = parts[parts.len() - 1].to_lowercase();
        if MODIFIERS.contains(&last.as_str()) || normalize_language_code(&last).is_some() {
            parts.pop();
        } else {
            break;
        }
    }

    parts.join(".")
}

/// Collapse any run of repeated dots down to one. Handles the empty
/// `{modifiers}` expansion leaving `..` in the result.
fn clean_filename_dots(name: &str) -> String {
    let mut cleaned = name.to_string();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    cleaned
}

/// Substitute `{original_name}`, `{lang_code}` and `{modifiers}` in the
/// output naming pattern.
pub fn build_output_filename(
    pattern: &str,
    base_name: &str,
    lang_code: &str,
    modifiers: &str,
) -> String {
    let filename = pattern
        .replace("{original_name}", base_name)
        .replace("{lang_code}", file_lang_code(lang_code))
        .replace("{modifiers}", modifiers);

    clean_filename_dots(&filename)
}

/// Base name and modifiers string for an input subtitle filename: the parsed
/// base when a language code was found, otherwise the stem with trailing
/// code/modifier segments stripped.
pub fn base_and_modifiers(file_name: &str) -> (String, String) {
    if let Some(parsed) = parse_subtitle_filename(file_name) {
        if parsed.lang_code.is_some() {
            return (parsed.base_name, parsed.modifiers_string);
        }
        let stem = parsed.base_name;
        return (strip_language_codes_from_name(&stem), String::new());
    }

    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    (strip_language_codes_from_name(&stem), String::new())
}

/// Resolve the output path for translating `input_path` into `lang_code`,
/// using the task's naming pattern. The output lands next to the input.
pub fn output_path_for(input_path: &Path, pattern: &str, lang_code: &str) -> PathBuf {
    let file_name = input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (base_name, modifiers) = base_and_modifiers(&file_name);
    let output_filename = build_output_filename(pattern, &base_name, lang_code, &modifiers);

    match input_path.parent() {
        Some(dir) => dir.join(output_filename),
        None => PathBuf::from(output_filename),
    }
}

/// Audio track the engine leaves next to the video after extraction.
pub fn extracted_audio_path(video: &Path) -> PathBuf {
    derived_sibling(video, "_extracted.mp3")
}

/// Subtitle the engine may leave next to the video during extraction.
pub fn extracted_subtitle_path(video: &Path) -> PathBuf {
    derived_sibling(video, "_extracted.srt")
}

fn derived_sibling(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}{}", stem, suffix);
    match source.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

pub fn is_subtitle_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("srt"))
        .unwrap_or(false)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            VIDEO_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Whether a subtitle and a video file form a pair: same directory, and the
/// subtitle's parsed base name equals the video's stem.
pub fn subtitle_video_pair(subtitle: &Path, video: &Path) -> bool {
    if subtitle.parent() != video.parent() {
        return false;
    }

    let subtitle_name = match subtitle.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return false,
    };
    let parsed = match parse_subtitle_filename(&subtitle_name) {
        Some(parsed) => parsed,
        None => return false,
    };

    let video_base = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    parsed.base_name == video_base
}
