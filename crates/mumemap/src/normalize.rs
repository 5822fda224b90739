//! Text canonicalization for the room index.
//!
//! MMapper computed the server-side index hashes from normalized text, so this
//! must produce exactly what MMapper produces. Do not "fix" the table.

const ESC: char = '\x1b';

/// Latin-1 192..=255 to ASCII, as MMapper does it.
const TRANSLIT_192: [char; 64] = [
    'A', 'A', 'A', 'A', 'A', 'A', 'A', 'C', 'E', 'E', 'E', 'E', 'I', 'I', 'I', 'I', // 192
    'D', 'N', 'O', 'O', 'O', 'O', 'O', 'x', 'O', 'U', 'U', 'U', 'U', 'Y', 'b', 'B', // 208
    'a', 'a', 'a', 'a', 'a', 'a', 'a', 'c', 'e', 'e', 'e', 'e', 'i', 'i', 'i', 'i', // 224
    'o', 'n', 'o', 'o', 'o', 'o', 'o', ':', 'o', 'u', 'u', 'u', 'u', 'y', 'b', 'y', // 240
];

/// Stands in for anything above 128 that has no table entry.
const PLACEHOLDER: char = 'z';

/// Strips terminal escapes and transliterates to MMapper's ASCII.
pub fn normalize(input: &str) -> String {
    let mut s = transliterate(&strip_escapes(input));
    // Transliteration can complete an escape such as "ESC [ 1 é".
    loop {
        let t = strip_escapes(&s);
        if t.len() == s.len() {
            return s;
        }
        s = t;
    }
}

/// Removes `ESC [ <non-letters>+ <letter>` sequences. Deliberately loose: it
/// is what the index was built with.
pub fn strip_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(i) = rest.find(ESC) {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        match escape_len(rest) {
            Some(n) => rest = &rest[n..],
            None => {
                out.push(ESC);
                rest = &rest[ESC.len_utf8()..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte length of the escape sequence at the start of `s`, if there is one.
fn escape_len(s: &str) -> Option<usize> {
    let body = s.strip_prefix(ESC)?.strip_prefix('[')?;
    let run = body
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic())
        .map(|(i, _)| i)?;
    if run == 0 {
        return None;
    }
    // ESC, '[', the run, the final letter.
    Some(2 + run + 1)
}

pub fn transliterate(input: &str) -> String {
    input
        .chars()
        .map(|ch| match ch as u32 {
            0..=128 => ch,
            c @ 192..=255 => TRANSLIT_192[(c - 192) as usize],
            _ => PLACEHOLDER,
        })
        .collect()
}

/// ECMAScript's `\s`, which is what the description collapsing used. Not the
/// same set as `char::is_whitespace` (U+0085 and U+FEFF differ).
fn is_js_space(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n'
            | '\u{0b}'
            | '\u{0c}'
            | '\r'
            | ' '
            | '\u{a0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200a}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{202f}'
            | '\u{205f}'
            | '\u{3000}'
            | '\u{feff}'
    )
}

/// Replaces every whitespace run with a single space.
pub fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_space = false;
    for ch in input.chars() {
        if is_js_space(ch) {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}
