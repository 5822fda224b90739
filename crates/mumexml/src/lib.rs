//! `mumexml`: incremental filter for MUME's pseudo-XML session markup.
//!
//! MUME can wrap its output in XML-like tags (`<room>`, `<name>`,
//! `<description>`, `<movement dir=north/>`, ...) once the client asks for it.
//! [`XmlParser`] negotiates that mode, strips the markup from what the player
//! sees and hands back every closed tag as a [`Tag`] event.
//!
//! Input may arrive split at any byte; tags and entities cut by a chunk
//! boundary are carried over to the next call.

pub mod parser;
pub mod scout;
pub mod tag;

pub use parser::{Filtered, NEGOTIATE_XML, XmlMode, XmlParser};
pub use scout::ScoutingState;
pub use tag::{Tag, decode_entities};
