//! Scouting detection.
//!
//! While the player scouts, MUME shows the rooms ahead of them with the usual
//! room markup. Those rooms must not move the tracked position, so the parser
//! holds back tag events until scouting ends.

use tracing::{info, warn};

use crate::tag::Tag;

const SCOUT_START: &str = "You quietly scout ";
const SCOUT_DIRS: [&str; 6] = ["north", "east", "south", "west", "up", "down"];
const SCOUT_STOP: &str = "You stop scouting.";

/// Scouting ends on its own after this much text if the stop line was missed.
pub const SCOUT_TIMEOUT_BYTES: usize = 100 * 1024;

#[derive(Debug, Default)]
pub struct ScoutingState {
    active: bool,
    bytes: usize,
}

impl ScoutingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Observe one decoded text fragment.
    pub fn push_text(&mut self, text: &str) {
        if let Some(end) = find_start_line(text) {
            self.bytes = text.len() - end;
            self.active = true;
            info!("starting to scout, ignoring new rooms");
        } else if self.active {
            self.bytes += text.len();

            if lines(text).any(|(_, l)| l.trim_end() == SCOUT_STOP) {
                self.active = false;
                info!("done scouting");
            } else if self.bytes > SCOUT_TIMEOUT_BYTES {
                self.active = false;
                warn!(bytes = self.bytes, "force-disabling scout mode");
            }
        }
    }

    /// Observe a closed tag. Moving while scouting (typically through a oneway
    /// exit) ends the scout.
    pub fn end_tag(&mut self, tag: &Tag) {
        if self.active && tag.name == "movement" {
            self.active = false;
            info!("aborting scout because of movement");
        }
    }
}

/// Lines of `text` paired with their byte offset.
fn lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split('\n').map(move |l| {
        let at = offset;
        offset += l.len() + 1;
        (at, l)
    })
}

/// Byte offset just past the "You quietly scout <dir>wards..." line, if any.
fn find_start_line(text: &str) -> Option<usize> {
    lines(text).find_map(|(at, l)| {
        let rest = l.trim_end().strip_prefix(SCOUT_START)?;
        let dir = rest.strip_suffix("wards...")?;
        SCOUT_DIRS.contains(&dir).then(|| (at + l.len()).min(text.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_stop_lines() {
        let mut s = ScoutingState::new();
        s.push_text("You quietly scout northwards...\r\n");
        assert!(s.active());

        s.push_text("A Flat Marsh\r\n");
        assert!(s.active());

        s.push_text("Some noise.\r\nYou stop scouting.\r\n");
        assert!(!s.active());
    }

    #[test]
    fn ignores_unknown_directions_and_mid_line_matches() {
        let mut s = ScoutingState::new();
        s.push_text("You quietly scout sidewards...\n");
        assert!(!s.active());
        s.push_text("Bob says 'You quietly scout northwards...'\n");
        assert!(!s.active());
    }

    #[test]
    fn times_out() {
        let mut s = ScoutingState::new();
        s.push_text("You quietly scout downwards...\n");
        assert!(s.active());

        let filler = "x".repeat(SCOUT_TIMEOUT_BYTES - 1);
        s.push_text(&filler);
        assert!(s.active());
        s.push_text("one more\n");
        assert!(!s.active());
    }

    #[test]
    fn movement_aborts_scout() {
        let mut s = ScoutingState::new();
        s.push_text("You quietly scout eastwards...\n");
        s.end_tag(&Tag::new("prompt", ""));
        assert!(s.active());
        s.end_tag(&Tag::new("movement", "dir=east"));
        assert!(!s.active());
    }
}
