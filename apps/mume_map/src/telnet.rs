//! Client side of the telnet stream.
//!
//! We negotiate nothing: every `IAC DO` is answered `IAC WONT` and every
//! `IAC WILL` is answered `IAC DONT`. Subnegotiation blocks are dropped, and
//! so is every other command (`GA` after prompts included).

pub const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    /// Game bytes with every telnet command removed.
    pub data: Vec<u8>,
    /// Negotiation answers for the server.
    pub replies: Vec<u8>,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subneg { iac_seen: bool },
}

#[derive(Debug, Default)]
pub struct TelnetFilter {
    state: State,
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands may be split across calls.
    pub fn parse(&mut self, chunk: &[u8]) -> Parsed {
        let mut p = Parsed {
            data: Vec::with_capacity(chunk.len()),
            ..Parsed::default()
        };

        for &b in chunk {
            self.state = match std::mem::take(&mut self.state) {
                State::Data if b == IAC => State::Iac,
                State::Data => {
                    p.data.push(b);
                    State::Data
                }
                State::Iac => match b {
                    IAC => {
                        p.data.push(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Negotiate(b),
                    SB => State::Subneg { iac_seen: false },
                    // GA, NOP and friends.
                    _ => State::Data,
                },
                State::Negotiate(cmd) => {
                    match cmd {
                        DO => p.replies.extend_from_slice(&[IAC, WONT, b]),
                        WILL => p.replies.extend_from_slice(&[IAC, DONT, b]),
                        _ => {}
                    }
                    State::Data
                }
                State::Subneg { iac_seen: true } if b == SE => State::Data,
                State::Subneg { iac_seen } => State::Subneg {
                    iac_seen: !iac_seen && b == IAC,
                },
            };
        }

        p
    }
}

/// Doubles every 0xff so the server reads it as data.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}
