use memchr::{memchr, memchr2};
use tracing::{info, warn};

use crate::scout::ScoutingState;
use crate::tag::{Tag, decode_entities, partial_entity_len};

/// Asks MUME for XML mode plus gratuitous room descriptions.
pub const NEGOTIATE_XML: &[u8] = b"~$#EX2\n1G\n";

/// Lines MUME prints once the player is past the login screens.
const ENTER_GAME_LINES: [&str; 2] = ["Reconnecting.", "Never forget! Try to role-play..."];

/// How long we keep listening for `<xml>` after asking for it.
const XML_DESIRABLE_WINDOW: usize = 1024;

pub const MAX_TAG_DEPTH: usize = 5;
pub const MAX_TAG_TEXT: usize = 1500;

/// Longest unterminated `<...` carried over to the next chunk.
const MAX_CARRY: usize = 256;

const XML_MARKER: &str = "<xml>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XmlMode {
    /// Not requested. `<xml>` from the server is not trusted, players could
    /// send fakes.
    #[default]
    Off,
    /// Request XML mode as soon as the login prompts are done.
    AsSoonAsPossible,
    /// Requested; waiting for `<xml>` for a bounded number of bytes.
    Desirable,
    /// Interpreting tags.
    On,
}

/// Result of filtering one chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filtered {
    /// What the player should see.
    pub text: String,
    /// Tags closed in this chunk, in order.
    pub tags: Vec<Tag>,
    /// Bytes to write back to the server.
    pub upstream: Vec<u8>,
}

struct Markup<'a> {
    closing: bool,
    name: &'a str,
    attr: &'a str,
    leaf: bool,
}

/// Filters MUME's XML-like markup out of the session text.
///
/// Sample input:
///
/// ```text
/// <xml>XML mode is now on.
/// <prompt>!f- CW&gt;</prompt>f
/// <movement dir=north/>
/// <room><name>A Flat Marsh</name>
/// <description>The few, low patches...
/// </description>A large green shrub grows here.
/// </room><exits>Exits: north, east, south.
/// </exits>
/// </xml>XML mode is now off.
/// ```
///
/// closes `prompt`, `movement` (attr `dir=north`), `name`, `description`,
/// `room`, `exits` and `xml`, in that order. The `xml` tag never accumulates
/// text, it would only grow over the session.
#[derive(Debug, Default)]
pub struct XmlParser {
    mode: XmlMode,
    desirable_bytes: usize,
    stack: Vec<Tag>,
    carry: String,
    /// Unterminated last line, kept only to spot the enter-game lines.
    line_tail: String,
    scouting: ScoutingState,
    out: Filtered,
}

impl XmlParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Resets everything for a fresh connection and plans to negotiate XML.
    pub fn connected(&mut self) {
        self.clear();
        self.mode = XmlMode::AsSoonAsPossible;
    }

    pub fn mode(&self) -> XmlMode {
        self.mode
    }

    /// Number of currently open tags.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn scouting(&self) -> bool {
        self.scouting.active()
    }

    pub fn filter_input_text(&mut self, chunk: &str) -> Filtered {
        let input = if self.carry.is_empty() {
            chunk.to_string()
        } else {
            let mut s = std::mem::take(&mut self.carry);
            s.push_str(chunk);
            s
        };

        let (text, xml) = self.detect_xml(&input);
        self.out.text.push_str(text);
        if !xml.is_empty() {
            self.scan_markup(xml);
        }

        std::mem::take(&mut self.out)
    }

    fn set_desirable(&mut self) {
        self.mode = XmlMode::Desirable;
        self.desirable_bytes = 0;
    }

    /// Splits `input` into a verbatim part and a markup part.
    fn detect_xml<'a>(&mut self, input: &'a str) -> (&'a str, &'a str) {
        match self.mode {
            XmlMode::Off => (input, ""),
            XmlMode::AsSoonAsPossible => {
                // Asking right away would print the login prompt twice, so wait
                // until the player is in the game.
                // The text itself is shown right away, only a copy of the
                // last partial line waits for the rest of it.
                let mut seen = std::mem::take(&mut self.line_tail);
                seen.push_str(input);
                let entering = seen
                    .split('\n')
                    .any(|l| ENTER_GAME_LINES.contains(&l.trim_end()));
                if entering {
                    self.out.upstream.extend_from_slice(NEGOTIATE_XML);
                    self.set_desirable();
                    info!("negotiating MUME XML mode");
                } else {
                    let last = seen.rfind('\n').map_or(0, |i| i + 1);
                    if seen.len() - last <= MAX_CARRY {
                        self.line_tail = seen.split_off(last);
                    }
                }
                (input, "")
            }
            XmlMode::Desirable => {
                if let Some(i) = input.find(XML_MARKER) {
                    if self.desirable_bytes + i < XML_DESIRABLE_WINDOW {
                        self.mode = XmlMode::On;
                        info!("enabled MUME XML mode");
                        return input.split_at(i);
                    }
                }

                if self.desirable_bytes >= XML_DESIRABLE_WINDOW {
                    self.mode = XmlMode::Off;
                    warn!("no <xml> after negotiation, leaving XML mode off");
                    return (input, "");
                }
                // Hold back a trailing "<", "<x", ... until the next chunk
                // tells whether it is the marker.
                let keep = (1..XML_MARKER.len())
                    .rev()
                    .find(|&n| input.ends_with(&XML_MARKER[..n]))
                    .unwrap_or(0);
                let (text, tail) = input.split_at(input.len() - keep);
                self.carry.push_str(tail);
                self.desirable_bytes += text.len();
                (text, "")
            }
            XmlMode::On => ("", input),
        }
    }

    fn scan_markup(&mut self, xml: &str) {
        let mut rest = xml;
        loop {
            let Some(lt) = memchr(b'<', rest.as_bytes()) else {
                let (text, tail) = rest.split_at(rest.len() - partial_entity_len(rest));
                self.push_text(text);
                self.carry.push_str(tail);
                return;
            };

            self.push_text(&rest[..lt]);
            let tail = &rest[lt..];
            match memchr2(b'<', b'>', &tail.as_bytes()[1..]) {
                None => {
                    if tail.len() > MAX_CARRY {
                        warn!(len = tail.len(), "unterminated tag, passing it through");
                        self.push_text(tail);
                    } else {
                        self.carry.push_str(tail);
                    }
                    return;
                }
                Some(i) if tail.as_bytes()[1 + i] == b'<' => {
                    // A lone '<': plain text up to the next one.
                    self.push_text(&tail[..1 + i]);
                    rest = &tail[1 + i..];
                }
                Some(i) => {
                    let markup = &tail[..i + 2];
                    match parse_markup(markup) {
                        Some(m) if m.leaf => {
                            self.start_tag(m.name, m.attr);
                            self.end_tag(m.name);
                        }
                        Some(m) if m.closing => self.end_tag(m.name),
                        Some(m) => self.start_tag(m.name, m.attr),
                        None => self.push_text(markup),
                    }
                    rest = &tail[i + 2..];
                }
            }
        }
    }

    /// True if the current input is wrapped in `<gratuitous>`: meant for the
    /// client, not the player.
    fn is_gratuitous(&self) -> bool {
        self.stack.iter().any(|t| t.name == "gratuitous")
    }

    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }

        let text = decode_entities(raw);
        self.scouting.push_text(&text);

        let gratuitous = self.is_gratuitous();
        match self.stack.last_mut() {
            None => self.out.text.push_str(&text),
            Some(top) if top.name == "xml" => self.out.text.push_str(&text),
            Some(top) if top.text.len() + text.len() > MAX_TAG_TEXT => {
                warn!(tag = %top.name, "run-away tag, force-closing it");
                self.stack.pop();
                if !self.is_gratuitous() {
                    self.out.text.push_str(&text);
                }
            }
            Some(top) => {
                top.text.push_str(&text);
                if !gratuitous {
                    self.out.text.push_str(&text);
                }
            }
        }
    }

    fn start_tag(&mut self, name: &str, attr: &str) {
        if self.stack.len() >= MAX_TAG_DEPTH {
            warn!(tag = name, open = %self.open_names(0), "ignoring deeply nested tag");
            return;
        }
        self.stack.push(Tag::new(name, attr));
    }

    fn end_tag(&mut self, name: &str) {
        if name == "xml" {
            // Most likely the player typed "cha xml" by mistake. Listen for a
            // while in case it comes back, then stay off rather than trust
            // markup we did not ask for.
            self.set_desirable();
        }

        let Some(i) = self.stack.iter().rposition(|t| t.name == name) else {
            warn!(tag = name, "ignoring unmatched closing tag");
            return;
        };
        if i + 1 != self.stack.len() {
            warn!(tag = name, open = %self.open_names(i + 1), "closing tag with other tags open");
            self.stack.truncate(i + 1);
        }

        let Some(tag) = self.stack.pop() else {
            return;
        };
        self.scouting.end_tag(&tag);
        if !self.scouting.active() {
            self.out.tags.push(tag);
        }
    }

    fn open_names(&self, from: usize) -> String {
        self.stack[from..]
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parses one `<...>` run: optional `/`, a name, at most one unquoted
/// attribute after a single space, optional trailing `/`.
fn parse_markup(m: &str) -> Option<Markup<'_>> {
    let inner = m.strip_prefix('<')?.strip_suffix('>')?;
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(r) => (true, r),
        None => (false, inner),
    };

    let name_len = inner
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    if name_len == 0 {
        return None;
    }
    let (name, mut rest) = inner.split_at(name_len);

    let mut attr = "";
    if let Some(a) = rest.strip_prefix(' ') {
        let n = a.find('/').unwrap_or(a.len());
        if n == 0 {
            return None;
        }
        attr = &a[..n];
        rest = &a[n..];
    }

    let leaf = match rest {
        "" => false,
        "/" => true,
        _ => return None,
    };

    Some(Markup {
        closing,
        name,
        attr,
        leaf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESC: &str = "The few, low patches of tangled rushes add a clear tone to the otherwise sombre\n\
colour of this flat marshland. Some puddles are scattered behind them, where\n\
there are many pebbles of varying sizes. Most of these pebbles have been\n\
covered by a thin layer of dark, green moss.\n";

    fn sample() -> String {
        format!(
            "<xml>XML mode is now on.\n\
<prompt>!f- CW&gt;</prompt>f\n\
You flee head over heels.\n\
You flee north.\n\
<movement dir=north/>\n\
<room><name>A Flat Marsh</name>\n\
<description>{DESC}</description>A large green shrub grows in the middle of a large pool of mud.\n\
</room><exits>Exits: north, east, south.\n\
</exits>\n\
<prompt>!%- CW&gt;</prompt>cha xml off\n\
</xml>XML mode is now off.\n"
        )
    }

    fn tag(name: &str, attr: &str, text: &str) -> Tag {
        Tag {
            name: name.to_string(),
            attr: attr.to_string(),
            text: text.to_string(),
        }
    }

    fn expected_tags() -> Vec<Tag> {
        vec![
            tag("prompt", "", "!f- CW>"),
            tag("movement", "dir=north", ""),
            tag("name", "", "A Flat Marsh"),
            tag("description", "", DESC),
            tag(
                "room",
                "",
                "\nA large green shrub grows in the middle of a large pool of mud.\n",
            ),
            tag("exits", "", "Exits: north, east, south.\n"),
            tag("prompt", "", "!%- CW>"),
            tag("xml", "", ""),
        ]
    }

    fn expected_text() -> String {
        format!(
            "XML mode is now on.\n\
!f- CW>f\n\
You flee head over heels.\n\
You flee north.\n\
\n\
A Flat Marsh\n\
{DESC}A large green shrub grows in the middle of a large pool of mud.\n\
Exits: north, east, south.\n\
\n\
!%- CW>cha xml off\n\
XML mode is now off.\n"
        )
    }

    /// A parser that negotiated XML and is waiting for `<xml>`.
    fn negotiated() -> XmlParser {
        let mut p = XmlParser::new();
        p.connected();
        let f = p.filter_input_text("Never forget! Try to role-play...\r\n");
        assert_eq!(f.text, "Never forget! Try to role-play...\r\n");
        assert_eq!(f.upstream, NEGOTIATE_XML);
        assert_eq!(p.mode(), XmlMode::Desirable);
        p
    }

    fn xml_on() -> XmlParser {
        let mut p = negotiated();
        let f = p.filter_input_text("<xml>");
        assert!(f.text.is_empty());
        assert_eq!(p.mode(), XmlMode::On);
        p
    }

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn sample_block_emits_documented_events() {
        let mut p = negotiated();
        let f = p.filter_input_text(&sample());
        assert_eq!(f.tags, expected_tags());
        assert_eq!(f.text, expected_text());
        assert!(f.upstream.is_empty());
        assert_eq!(p.mode(), XmlMode::Desirable);
        assert_eq!(p.depth(), 0);
    }

    #[test]
    fn sample_block_split_into_single_chars() {
        let mut p = xml_on();
        let s = sample();
        let mut text = String::new();
        let mut tags = Vec::new();
        for ch in s["<xml>".len()..].chars() {
            let f = p.filter_input_text(ch.encode_utf8(&mut [0u8; 4]));
            text.push_str(&f.text);
            tags.extend(f.tags);
        }
        assert_eq!(tags, expected_tags());
        assert_eq!(text, expected_text());
    }

    #[test]
    fn text_before_xml_marker_passes_verbatim() {
        let mut p = negotiated();
        let f = p.filter_input_text("Welcome back.\n<xml><prompt>*&gt;</prompt>");
        assert_eq!(f.text, "Welcome back.\n*>");
        assert_eq!(names(&f.tags), vec!["prompt"]);
    }

    #[test]
    fn off_mode_never_interprets_markup() {
        let mut p = XmlParser::new();
        let f = p.filter_input_text("<xml><name>Fake</name>");
        assert_eq!(f.text, "<xml><name>Fake</name>");
        assert!(f.tags.is_empty());

        p.connected();
        let f = p.filter_input_text("<xml><name>Fake</name>\n");
        assert_eq!(f.text, "<xml><name>Fake</name>\n");
        assert!(f.tags.is_empty());
        assert_eq!(p.mode(), XmlMode::AsSoonAsPossible);
    }

    #[test]
    fn reconnecting_line_also_negotiates() {
        let mut p = XmlParser::new();
        p.connected();
        let f = p.filter_input_text("Password: \nReconnecting.  \n");
        assert_eq!(f.upstream, NEGOTIATE_XML);
        assert_eq!(p.mode(), XmlMode::Desirable);
    }

    #[test]
    fn enter_game_line_split_across_reads() {
        let mut p = XmlParser::new();
        p.connected();
        let f = p.filter_input_text("Password: \nReconn");
        assert_eq!(f.text, "Password: \nReconn");
        assert!(f.upstream.is_empty());
        let f = p.filter_input_text("ecting.\r\n");
        assert_eq!(f.text, "ecting.\r\n");
        assert_eq!(f.upstream, NEGOTIATE_XML);
        assert_eq!(p.mode(), XmlMode::Desirable);
    }

    #[test]
    fn xml_marker_split_across_reads() {
        let mut p = negotiated();
        let f = p.filter_input_text("Hello <xm");
        assert_eq!(f.text, "Hello ");
        assert_eq!(p.mode(), XmlMode::Desirable);
        let f = p.filter_input_text("l>XML mode is now on.\n<room><name>Hall</name>");
        assert_eq!(p.mode(), XmlMode::On);
        assert_eq!(f.text, "XML mode is now on.\nHall");
        assert_eq!(f.tags, vec![tag("name", "", "Hall")]);
        assert_eq!(p.depth(), 2);
    }

    #[test]
    fn held_back_angle_bracket_is_released_as_text() {
        let mut p = negotiated();
        let f = p.filter_input_text("a <");
        assert_eq!(f.text, "a ");
        let f = p.filter_input_text(" b\n");
        assert_eq!(f.text, "< b\n");
        assert_eq!(p.mode(), XmlMode::Desirable);
    }

    #[test]
    fn desirable_gives_up_after_window() {
        let mut p = negotiated();
        p.filter_input_text(&"a".repeat(1000));
        p.filter_input_text(&"b".repeat(100));
        assert_eq!(p.mode(), XmlMode::Desirable);
        p.filter_input_text("c");
        assert_eq!(p.mode(), XmlMode::Off);

        let f = p.filter_input_text("<xml><name>Fake</name>");
        assert_eq!(f.text, "<xml><name>Fake</name>");
        assert!(f.tags.is_empty());
    }

    #[test]
    fn xml_marker_too_late_is_ignored() {
        let mut p = negotiated();
        p.filter_input_text(&"a".repeat(1000));
        let late = format!("{}<xml>", "b".repeat(30));
        let f = p.filter_input_text(&late);
        assert_eq!(f.text, late);
        assert_eq!(p.mode(), XmlMode::Desirable);
    }

    #[test]
    fn closing_xml_rearms_negotiation_window() {
        let mut p = xml_on();
        let f = p.filter_input_text("</xml>XML mode is now off.\n");
        assert_eq!(names(&f.tags), vec!["xml"]);
        assert_eq!(p.mode(), XmlMode::Desirable);

        let f = p.filter_input_text("<xml>back<prompt>&gt;</prompt>");
        assert_eq!(p.mode(), XmlMode::On);
        assert_eq!(f.text, "back>");
        assert_eq!(names(&f.tags), vec!["prompt"]);
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let mut p = xml_on();
        let f = p.filter_input_text("<a><b><c><d><e><f>deep");
        assert!(f.tags.is_empty());
        assert_eq!(p.depth(), MAX_TAG_DEPTH);

        let f = p.filter_input_text("</f></e></d></c></b></a>");
        assert_eq!(names(&f.tags), vec!["d", "c", "b", "a"]);
        assert_eq!(f.tags[0].text, "deep");
        assert_eq!(p.depth(), 1);
    }

    #[test]
    fn runaway_tag_is_force_closed() {
        let mut p = xml_on();
        let x = "x".repeat(1000);
        let y = "y".repeat(600);
        let f = p.filter_input_text(&format!("<name>{x}"));
        assert_eq!(f.text, x);
        assert_eq!(p.depth(), 2);

        let f = p.filter_input_text(&format!("{y}</name>"));
        assert_eq!(f.text, y);
        assert!(f.tags.is_empty());
        assert_eq!(p.depth(), 1);
    }

    #[test]
    fn misnested_close_discards_inner_tags() {
        let mut p = xml_on();
        let f = p.filter_input_text("<room><name>Foo</room></bogus>");
        assert_eq!(names(&f.tags), vec!["room"]);
        assert_eq!(f.tags[0].text, "");
        assert_eq!(f.text, "Foo");
        assert_eq!(p.depth(), 1);
    }

    #[test]
    fn gratuitous_text_is_hidden_from_player() {
        let mut p = xml_on();
        let f = p.filter_input_text(
            "<room><name>Hall</name><gratuitous><description>Stone walls.\n</description></gratuitous></room>",
        );
        assert_eq!(f.text, "Hall");
        assert_eq!(names(&f.tags), vec!["name", "description", "gratuitous", "room"]);
        assert_eq!(f.tags[1].text, "Stone walls.\n");
    }

    #[test]
    fn scouting_suppresses_room_events() {
        let mut p = xml_on();
        let f = p.filter_input_text(
            "You quietly scout northwards...\n\
<room><name>Elsewhere</name><description>Far away.\n</description></room>\
You stop scouting.\n<room><name>Here</name>",
        );
        assert_eq!(f.tags, vec![tag("name", "", "Here")]);
        assert!(!p.scouting());
    }

    #[test]
    fn movement_ends_scouting() {
        let mut p = xml_on();
        let f = p.filter_input_text("You quietly scout eastwards...\n<movement dir=east/><name>Oneway</name>");
        assert_eq!(f.tags, vec![tag("movement", "dir=east", ""), tag("name", "", "Oneway")]);
    }

    #[test]
    fn entity_split_across_chunks() {
        let mut p = xml_on();
        let f = p.filter_input_text("<prompt>CW&g");
        assert_eq!(f.text, "CW");
        let f = p.filter_input_text("t;</prompt>");
        assert_eq!(f.text, ">");
        assert_eq!(f.tags, vec![tag("prompt", "", "CW>")]);
    }

    #[test]
    fn tag_split_across_chunks() {
        let mut p = xml_on();
        let f = p.filter_input_text("You flee.\n<movem");
        assert_eq!(f.text, "You flee.\n");
        let f = p.filter_input_text("ent dir=south/>");
        assert_eq!(f.tags, vec![tag("movement", "dir=south", "")]);
    }

    #[test]
    fn stray_angle_brackets_are_text() {
        let mut p = xml_on();
        let f = p.filter_input_text("a < b <name>x</name> <3 > <!-- -->");
        assert_eq!(f.text, "a < b x <3 > <!-- -->");
        assert_eq!(f.tags, vec![tag("name", "", "x")]);
    }

    #[test]
    fn connected_resets_state() {
        let mut p = xml_on();
        p.filter_input_text("You quietly scout upwards...\n<room><name>");
        assert!(p.scouting());
        p.connected();
        assert!(!p.scouting());
        assert_eq!(p.depth(), 0);
        assert_eq!(p.mode(), XmlMode::AsSoonAsPossible);
    }
}
