//! LaTeX escape decoding for author names.
//!
//! Feed author strings arrive with TeX accents such as `Schr\"odinger`,
//! `{\'E}mile` or `Fran\c{c}ois`. Accents become Unicode combining marks and
//! the result is NFC-composed, so `\"o` yields a single `ö`.

use std::iter::Peekable;
use std::str::Chars;

use unicode_normalization::UnicodeNormalization;

/// Combining mark for a TeX accent command, if `cmd` is one.
fn accent_mark(cmd: &str) -> Option<char> {
    let mark = match cmd {
        "'" => '\u{0301}',
        "`" => '\u{0300}',
        "^" => '\u{0302}',
        "\"" => '\u{0308}',
        "~" => '\u{0303}',
        "=" => '\u{0304}',
        "." => '\u{0307}',
        "u" => '\u{0306}',
        "v" => '\u{030C}',
        "H" => '\u{030B}',
        "c" => '\u{0327}',
        "k" => '\u{0328}',
        "r" => '\u{030A}',
        "d" => '\u{0323}',
        "b" => '\u{0331}',
        _ => return None,
    };
    Some(mark)
}

/// Replacement text for a TeX letter or escape command.
fn letter_command(cmd: &str) -> Option<&'static str> {
    let text = match cmd {
        "ss" => "ß",
        "o" => "ø",
        "O" => "Ø",
        "l" => "ł",
        "L" => "Ł",
        "ae" => "æ",
        "AE" => "Æ",
        "oe" => "œ",
        "OE" => "Œ",
        "aa" => "å",
        "AA" => "Å",
        "i" => "ı",
        "j" => "ȷ",
        "&" => "&",
        "%" => "%",
        "_" => "_",
        "$" => "$",
        "#" => "#",
        "{" => "{",
        "}" => "}",
        " " => " ",
        "," => " ",
        _ => return None,
    };
    Some(text)
}

/// Decode a TeX-escaped name into plain Unicode. Unknown commands are kept
/// verbatim; decoding never fails.
pub fn decode_author_name(name: &str) -> String {
    let mut chars = name.chars().peekable();
    let decoded = decode_until(&mut chars, None);
    decoded.nfc().collect::<String>().trim().to_string()
}

fn decode_until(chars: &mut Peekable<Chars<'_>>, close: Option<char>) -> String {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str(&decode_command(chars)),
            '{' => out.push_str(&decode_until(chars, Some('}'))),
            '~' => out.push(' '),
            '$' => {}
            c if Some(c) == close => return out,
            '}' => {}
            c => out.push(c),
        }
    }
    out
}

fn read_command_name(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut name = String::new();
    match chars.peek() {
        Some(c) if c.is_ascii_alphabetic() => {
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_alphabetic() {
                    break;
                }
                name.push(c);
                chars.next();
            }
        }
        Some(&c) => {
            name.push(c);
            chars.next();
        }
        None => {}
    }
    name
}

fn skip_spaces(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| *c == ' ') {
        chars.next();
    }
}

fn decode_command(chars: &mut Peekable<Chars<'_>>) -> String {
    let cmd = read_command_name(chars);
    if cmd.is_empty() {
        return "\\".to_string();
    }
    let control_word = cmd.chars().all(|c| c.is_ascii_alphabetic());

    if let Some(mark) = accent_mark(&cmd) {
        if control_word {
            skip_spaces(chars);
        }
        let base = read_accent_argument(chars);
        return apply_accent(&base, mark);
    }

    if let Some(text) = letter_command(&cmd) {
        if control_word {
            skip_spaces(chars);
        }
        return text.to_string();
    }

    format!("\\{}", cmd)
}

fn read_accent_argument(chars: &mut Peekable<Chars<'_>>) -> String {
    match chars.next() {
        Some('{') => decode_until(chars, Some('}')),
        Some('\\') => decode_command(chars),
        Some(c) => c.to_string(),
        None => String::new(),
    }
}

fn apply_accent(base: &str, mark: char) -> String {
    let mut it = base.chars();
    match it.next() {
        // Dotless i/j take the accent as plain i/j.
        Some('ı') => std::iter::once('i').chain(std::iter::once(mark)).chain(it).collect(),
        Some('ȷ') => std::iter::once('j').chain(std::iter::once(mark)).chain(it).collect(),
        Some(first) => std::iter::once(first)
            .chain(std::iter::once(mark))
            .chain(it)
            .collect(),
        None => mark.to_string(),
    }
}
