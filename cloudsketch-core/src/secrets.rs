//! Virtualization of the per-sketch secrets file.
//!
//! `arduino_secrets.h` never exists in the remote store. It is rendered
//! from the sketch's secret key/value metadata on read, and the matching
//! `#include` line in the main sketch file only ever exists locally: it is
//! injected when reading and stripped before writing upstream.

use std::sync::OnceLock;

use regex::Regex;

use crate::client::SketchSecret;

pub const SECRETS_FILE: &str = "arduino_secrets.h";
pub const INCLUDE_LINE: &str = "#include \"arduino_secrets.h\"";

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^[^\S\r\n]*#include[^\S\r\n]+["<]arduino_secrets\.h[">][^\S\r\n]*\r?\n?"#)
            .expect("static include pattern")
    })
}

fn define_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^[^\S\r\n]*#define[^\S\r\n]+(\w+)[^\S\r\n]+"(.*)""#)
            .expect("static define pattern")
    })
}

pub fn is_secrets_file(path: &str) -> bool {
    file_name(path) == SECRETS_FILE
}

/// The main file of a sketch directory is `<dir-name>.ino`.
pub fn is_main_file(path: &str) -> bool {
    let Some((parent, name)) = path.trim_end_matches('/').rsplit_once('/') else {
        return false;
    };
    let Some(dir_name) = parent.rsplit('/').next() else {
        return false;
    };
    !dir_name.is_empty() && name == format!("{dir_name}.ino")
}

pub fn has_include(content: &str) -> bool {
    include_regex().is_match(content)
}

/// Prepend the secrets include unless it is already present. Applying this
/// twice yields the same content as applying it once.
pub fn ensure_include(content: &str) -> String {
    if has_include(content) {
        return content.to_string();
    }
    format!("{INCLUDE_LINE}\n{content}")
}

/// Remove every secrets include line, each with its trailing newline, so a
/// strip of an injected file restores the original bytes.
pub fn strip_include(content: &str) -> String {
    include_regex().replace_all(content, "").into_owned()
}

pub fn render_defines(secrets: &[SketchSecret]) -> String {
    let mut out = String::new();
    for secret in secrets {
        out.push_str(&format!("#define {} \"{}\"\n", secret.name, secret.value));
    }
    out
}

pub fn parse_defines(content: &str) -> Vec<SketchSecret> {
    define_regex()
        .captures_iter(content)
        .map(|captures| SketchSecret {
            name: captures[1].to_string(),
            value: captures[2].to_string(),
        })
        .collect()
}

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
