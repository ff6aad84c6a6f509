//! Collects presence stanzas that straddle more than one read.

use quick_xml::errors::{IllFormedError, SyntaxError};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Top-level stanzas that can never continue a pending presence
const STANZA_OPENERS: &[&[u8]] = &[b"<presence", b"<iq", b"<message"];

#[derive(Debug, PartialEq, Eq)]
pub enum Assembly {
    /// More bytes are needed before the fragment can be parsed
    Pending,
    /// Every opened element is closed; the bytes are ready for rewriting
    Complete(Vec<u8>),
    /// The buffered bytes can never become a valid fragment and were dropped
    Discarded(String),
}

enum Balance {
    Closed,
    Open,
    IllFormed(String),
}

pub struct StanzaAssembler {
    buffer: Vec<u8>,
    max_bytes: usize,
    max_continuations: usize,
    continuations: usize,
}

impl StanzaAssembler {
    /// `max_continuations` is how many further reads a partial stanza may
    /// wait for before it is given up on.
    pub fn new(max_bytes: usize, max_continuations: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_bytes,
            max_continuations,
            continuations: 0,
        }
    }

    pub fn is_assembling(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop any partial stanza, returning how many bytes were held.
    pub fn abandon(&mut self) -> usize {
        let held = self.buffer.len();
        self.reset();
        held
    }

    pub fn push(&mut self, chunk: &[u8]) -> Assembly {
        if self.is_assembling() {
            self.continuations = self.continuations.saturating_add(1);
        }
        self.buffer.extend_from_slice(chunk);

        match balance(&self.buffer) {
            Balance::Closed => {
                self.continuations = 0;
                Assembly::Complete(std::mem::take(&mut self.buffer))
            }
            Balance::Open if self.buffer.len() > self.max_bytes => {
                let held = self.abandon();
                Assembly::Discarded(format!(
                    "partial stanza exceeded {} bytes ({} buffered)",
                    self.max_bytes, held
                ))
            }
            Balance::Open if self.continuations > self.max_continuations => {
                let reads = self.continuations;
                self.reset();
                Assembly::Discarded(format!("partial stanza still open after {reads} more reads"))
            }
            Balance::Open => Assembly::Pending,
            Balance::IllFormed(reason) => {
                self.reset();
                Assembly::Discarded(reason)
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.continuations = 0;
    }
}

/// Whether `chunk` begins a new top-level stanza rather than continuing one
pub fn opens_stanza(chunk: &[u8]) -> bool {
    let start = chunk
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(chunk.len());
    let chunk = chunk.get(start..).unwrap_or_default();

    STANZA_OPENERS.iter().any(|opener| {
        chunk.strip_prefix(*opener).is_some_and(|rest| {
            rest.first()
                .is_none_or(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
        })
    })
}

/// Syntax errors that only mean the read stopped partway through markup
fn is_truncation(error: &SyntaxError) -> bool {
    matches!(
        error,
        SyntaxError::UnclosedTag
            | SyntaxError::UnclosedComment
            | SyntaxError::UnclosedCData
            | SyntaxError::UnclosedPIOrXmlDecl
    )
}

fn balance(bytes: &[u8]) -> Balance {
    let mut reader = Reader::from_reader(bytes);
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth = depth.saturating_add(1),
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => {
                return if depth == 0 {
                    Balance::Closed
                } else {
                    Balance::Open
                };
            }
            Ok(_) => {}
            Err(quick_xml::Error::Syntax(e)) if is_truncation(&e) => return Balance::Open,
            Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_))) => {
                return Balance::Open
            }
            Err(e) => return Balance::IllFormed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_chunk() {
        let mut assembler = StanzaAssembler::new(1024, 2);
        let raw = b"<presence><show>chat</show></presence>";
        assert_eq!(assembler.push(raw), Assembly::Complete(raw.to_vec()));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_split_across_reads() {
        let mut assembler = StanzaAssembler::new(1024, 2);
        assert_eq!(assembler.push(b"<presence><sh"), Assembly::Pending);
        assert!(assembler.is_assembling());
        assert_eq!(assembler.push(b"ow>chat</show>"), Assembly::Pending);
        assert_eq!(
            assembler.push(b"</presence>"),
            Assembly::Complete(b"<presence><show>chat</show></presence>".to_vec())
        );
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_split_inside_multibyte_text() {
        let full = "<presence><status>caf\u{e9}</status></presence>".as_bytes();
        let split = full.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut assembler = StanzaAssembler::new(1024, 2);
        assert_eq!(assembler.push(&full[..split]), Assembly::Pending);
        assert_eq!(assembler.push(&full[split..]), Assembly::Complete(full.to_vec()));
    }

    #[test]
    fn test_mismatched_tags_are_discarded() {
        let mut assembler = StanzaAssembler::new(1024, 2);
        assert!(matches!(
            assembler.push(b"<presence><show>chat</status></presence>"),
            Assembly::Discarded(_)
        ));
        assert!(!assembler.is_assembling());

        let raw = b"<presence/>";
        assert_eq!(assembler.push(raw), Assembly::Complete(raw.to_vec()));
    }

    #[test]
    fn test_bad_markup_is_discarded_not_held() {
        let mut assembler = StanzaAssembler::new(1024, 2);
        assert!(matches!(
            assembler.push(b"<presence><!bogus></presence>"),
            Assembly::Discarded(_)
        ));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_unclosed_markup_waits_for_more() {
        for partial in [
            &b"<presence><show"[..],
            b"<presence><!-- note",
            b"<presence><status><![CDATA[afk",
            b"<presence><?pi",
        ] {
            let mut assembler = StanzaAssembler::new(1024, 2);
            assert_eq!(assembler.push(partial), Assembly::Pending, "{partial:?}");
        }
    }

    #[test]
    fn test_oversized_partial_is_discarded() {
        let mut assembler = StanzaAssembler::new(16, 8);
        assert_eq!(assembler.push(b"<presence>"), Assembly::Pending);
        assert!(matches!(
            assembler.push(b"<status>this never ends"),
            Assembly::Discarded(_)
        ));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_partial_gives_up_after_max_reads() {
        let mut assembler = StanzaAssembler::new(1024, 1);
        assert_eq!(assembler.push(b"<presence>"), Assembly::Pending);
        assert_eq!(assembler.push(b"<show>chat</show>"), Assembly::Pending);
        assert!(matches!(
            assembler.push(b"<status>afk</status>"),
            Assembly::Discarded(_)
        ));
        assert!(!assembler.is_assembling());

        let raw = b"<presence/>";
        assert_eq!(assembler.push(raw), Assembly::Complete(raw.to_vec()));
    }

    #[test]
    fn test_abandon_clears_partial() {
        let mut assembler = StanzaAssembler::new(1024, 2);
        assert_eq!(assembler.push(b"<presence><show>chat</show>"), Assembly::Pending);
        assert_eq!(assembler.abandon(), 27);
        assert!(!assembler.is_assembling());
        assert_eq!(assembler.abandon(), 0);
    }

    #[test]
    fn test_opens_stanza() {
        assert!(opens_stanza(b"<presence><show>chat</show></presence>"));
        assert!(opens_stanza(b"\r\n <iq type='get' id='ping'/>"));
        assert!(opens_stanza(b"<message to='a@b'>"));
        assert!(opens_stanza(b"<presence/>"));

        assert!(!opens_stanza(b"</presence>"));
        assert!(!opens_stanza(b"<show>chat</show>"));
        assert!(!opens_stanza(b"<iqx/>"));
        assert!(!opens_stanza(b"ow>chat</show>"));
        assert!(!opens_stanza(b""));
    }
}
