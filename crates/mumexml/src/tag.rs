/// One element closed by the parser.
///
/// `attr` is the raw attribute string (MUME sends at most one, unquoted), for
/// example `dir=north`. `text` is the decoded body without nested tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub attr: String,
    pub text: String,
}

impl Tag {
    pub fn new(name: &str, attr: &str) -> Self {
        Self {
            name: name.to_string(),
            attr: attr.to_string(),
            text: String::new(),
        }
    }
}

const ENTITIES: [(&str, char); 3] = [("&lt;", '<'), ("&gt;", '>'), ("&amp;", '&')];

/// Decode the three entities MUME escapes in XML mode. Anything else after a
/// `&` is kept verbatim.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        match ENTITIES.iter().find(|(e, _)| rest.starts_with(e)) {
            Some((e, ch)) => {
                out.push(*ch);
                rest = &rest[e.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of a trailing fragment that could still become an entity once the
/// next chunk arrives (`&`, `&l`, `&amp`, ...). Zero if there is none.
pub(crate) fn partial_entity_len(text: &str) -> usize {
    let Some(i) = text.rfind('&') else {
        return 0;
    };
    let tail = &text[i..];
    let open = ENTITIES
        .iter()
        .any(|(e, _)| e.len() > tail.len() && e.starts_with(tail));
    if open { tail.len() } else { 0 }
}
