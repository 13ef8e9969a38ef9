//! Line-oriented container decoder
//!
//! States:
//!
//! ```text
//! Start ──<SUBMISSION>/<SEC-DOCUMENT>──▶ Root ──<DOCUMENT>──▶ Document ──<TEXT>──▶ Text
//!   │                                     ▲                     │  ▲                 │
//!   │                                     └────</DOCUMENT>──────┘  └────</TEXT>──────┘
//!   └── anything else: the whole stream is one anonymous document
//! ```
//!
//! Outside `Text`, `<TAG>value` assigns into the current scope, a bare
//! `<TAG>` opens a nested scope and `</TAG>` closes it. A bare tag that is
//! never closed is a flag: when something encloses it implicitly, the tag
//! is kept as an empty value and whatever it collected moves up one level.
//!
//! Inside `Text` every line is kept byte-for-byte. Only `</TEXT>` ends it,
//! and the legacy `<PDF>`/`</PDF>` wrapper lines are dropped.

use std::sync::OnceLock;

use regex::Regex;

use super::errors::{DecodeError, DecodeResult};
use super::uudecode;
use super::value::{OrderedMap, Value};

/// Top-level markers that open the submission header
const ROOT_MARKERS: [&str; 3] = ["SUBMISSION", "SEC-DOCUMENT", "IMS-DOCUMENT"];

/// First line of the privacy-enhanced wrapper found on 1990s filings
const PEM_BEGIN: &[u8] = b"-----BEGIN PRIVACY-ENHANCED MESSAGE-----";

/// Decoder options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Close unterminated structure implicitly instead of failing
    pub lenient: bool,
}

impl DecodeOptions {
    pub fn strict() -> Self {
        Self { lenient: false }
    }

    pub fn lenient() -> Self {
        Self { lenient: true }
    }
}

/// One document as it appeared in the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Tags declared inside `<DOCUMENT>` (TYPE, SEQUENCE, FILENAME, ...)
    pub fields: OrderedMap,
    /// `<TEXT>` payload, uudecoded when it carried a uuencode header
    pub content: Vec<u8>,
    /// True when `content` was uudecoded
    pub uudecoded: bool,
}

/// Decoder output: the header tree and documents in encounter order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedContainer {
    /// Top-level marker that opened the header, if any
    pub root_tag: Option<String>,
    pub header: OrderedMap,
    pub documents: Vec<RawDocument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Root,
    Document,
    Text,
    Closed,
}

#[derive(Debug)]
struct Scope {
    tag: String,
    map: OrderedMap,
}

impl Scope {
    fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            map: OrderedMap::new(),
        }
    }
}

/// Section of the `<SEC-HEADER>` colon dialect, nested by tab depth
#[derive(Debug)]
struct ColonSection {
    indent: usize,
    key: String,
    map: OrderedMap,
}

enum TagLine<'a> {
    Open { tag: &'a str, value: &'a str },
    Close { tag: &'a str },
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"^<(/?)([A-Za-z0-9][A-Za-z0-9._-]*)>(.*)$")
            .unwrap_or_else(|e| unreachable!("constant tag pattern: {}", e))
    })
}

fn parse_tag_line(trimmed: &str) -> Option<TagLine<'_>> {
    let caps = tag_regex().captures(trimmed)?;
    let tag = caps.get(2)?.as_str();
    if caps.get(1).map_or(false, |m| !m.as_str().is_empty()) {
        Some(TagLine::Close { tag })
    } else {
        let value = caps.get(3).map_or("", |m| m.as_str().trim());
        Some(TagLine::Open { tag, value })
    }
}

fn trim_bytes(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &line[start..end]
}

fn is_marker(trimmed: &[u8], marker: &str) -> bool {
    trimmed.eq_ignore_ascii_case(marker.as_bytes())
}

fn is_bare(tag_line: &TagLine<'_>, name: &str) -> bool {
    matches!(tag_line, TagLine::Open { tag, value } if value.is_empty() && tag.eq_ignore_ascii_case(name))
}

fn is_close(tag_line: &TagLine<'_>, name: &str) -> bool {
    matches!(tag_line, TagLine::Close { tag } if tag.eq_ignore_ascii_case(name))
}

/// Decode a raw container
pub fn decode(input: &[u8], options: DecodeOptions) -> DecodeResult<DecodedContainer> {
    let mut decoder = Decoder::new(options);
    for line in input.split_inclusive(|b| *b == b'\n') {
        decoder.line_no += 1;
        if decoder.state == State::Start {
            if decoder.start_line(line) {
                return decoder.anonymous(input);
            }
        } else {
            decoder.line(line)?;
        }
    }
    decoder.finish()
}

struct Decoder {
    options: DecodeOptions,
    state: State,
    line_no: usize,
    in_pem_preamble: bool,
    root_tag: Option<String>,
    header: Vec<Scope>,
    closed_header: Option<OrderedMap>,
    colon: Option<Vec<ColonSection>>,
    document: Vec<Scope>,
    text: Vec<u8>,
    documents: Vec<RawDocument>,
}

impl Decoder {
    fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            state: State::Start,
            line_no: 0,
            in_pem_preamble: false,
            root_tag: None,
            header: Vec::new(),
            closed_header: None,
            colon: None,
            document: Vec::new(),
            text: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// Handle a line before any structure was seen. Returns true when the
    /// stream carries no recognizable markers at all.
    fn start_line(&mut self, line: &[u8]) -> bool {
        let trimmed = trim_bytes(line);
        if trimmed.is_empty() {
            return false;
        }
        if trimmed == PEM_BEGIN {
            self.in_pem_preamble = true;
            return false;
        }

        let text = String::from_utf8_lossy(trimmed);
        match parse_tag_line(&text) {
            Some(TagLine::Open { tag, value })
                if ROOT_MARKERS.iter().any(|m| m.eq_ignore_ascii_case(tag)) =>
            {
                let tag = tag.to_ascii_uppercase();
                let mut root = Scope::new(tag.clone());
                if !value.is_empty() {
                    root.map.insert(tag.clone(), Value::Scalar(value.to_string()));
                }
                self.root_tag = Some(tag);
                self.header.push(root);
                self.state = State::Root;
                false
            }
            Some(ref tag_line) if is_bare(tag_line, "DOCUMENT") => {
                self.begin_document();
                false
            }
            // Proc-Type, Originator-Name and friends
            _ if self.in_pem_preamble => false,
            _ => true,
        }
    }

    fn anonymous(self, input: &[u8]) -> DecodeResult<DecodedContainer> {
        let mut fields = OrderedMap::new();
        fields.insert("SEQUENCE", Value::Scalar("1".to_string()));
        let (content, uudecoded) = match uudecode::decode(input)? {
            Some(bytes) => (bytes, true),
            None => (input.to_vec(), false),
        };
        Ok(DecodedContainer {
            root_tag: None,
            header: OrderedMap::new(),
            documents: vec![RawDocument {
                fields,
                content,
                uudecoded,
            }],
        })
    }

    fn line(&mut self, line: &[u8]) -> DecodeResult<()> {
        let trimmed = trim_bytes(line);

        if self.state == State::Text {
            if is_marker(trimmed, "</TEXT>") {
                self.state = State::Document;
            } else if !(is_marker(trimmed, "<PDF>") || is_marker(trimmed, "</PDF>")) {
                self.text.extend_from_slice(line);
            }
            return Ok(());
        }

        if trimmed.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(trimmed).into_owned();

        match self.state {
            State::Root => self.root_line(line, &text),
            State::Document => self.document_line(&text),
            _ => Ok(()),
        }
    }

    fn root_line(&mut self, raw: &[u8], text: &str) -> DecodeResult<()> {
        let Some(tag_line) = parse_tag_line(text) else {
            if self.colon.is_some() {
                self.colon_line(raw, text);
            }
            return Ok(());
        };

        if is_bare(&tag_line, "DOCUMENT") {
            self.end_colon_header();
            hoist_to(&mut self.header, 1);
            self.begin_document();
            return Ok(());
        }

        if is_bare(&tag_line, "TEXT") {
            if !self.options.lenient {
                return Err(DecodeError::MisplacedTag {
                    line: self.line_no,
                    tag: "TEXT".to_string(),
                });
            }
            self.end_colon_header();
            hoist_to(&mut self.header, 1);
            self.begin_document();
            let sequence = (self.documents.len() + 1).to_string();
            if let Some(doc) = self.document.last_mut() {
                doc.map.insert("SEQUENCE", Value::Scalar(sequence));
            }
            self.state = State::Text;
            return Ok(());
        }

        // After a header-less <DOCUMENT>...</DOCUMENT> there is no scope to fill.
        if self.header.is_empty() {
            return Ok(());
        }

        match tag_line {
            TagLine::Open { tag, value } if tag.eq_ignore_ascii_case("SEC-HEADER") => {
                if !value.is_empty() {
                    self.header_insert(tag, Value::Scalar(value.to_string()));
                }
                self.colon = Some(Vec::new());
            }
            TagLine::Close { tag } if tag.eq_ignore_ascii_case("SEC-HEADER") => {
                self.end_colon_header();
            }
            TagLine::Open { tag, value } => {
                if value.is_empty() {
                    self.header.push(Scope::new(tag));
                } else {
                    self.header_insert(tag, Value::Scalar(value.to_string()));
                }
            }
            TagLine::Close { tag } => {
                let Some(depth) = self
                    .header
                    .iter()
                    .rposition(|s| s.tag.eq_ignore_ascii_case(tag))
                else {
                    return Ok(());
                };
                self.end_colon_header();
                hoist_to(&mut self.header, depth + 1);
                if depth == 0 {
                    self.close_root();
                } else {
                    close_scope(&mut self.header);
                }
            }
        }
        Ok(())
    }

    fn document_line(&mut self, text: &str) -> DecodeResult<()> {
        let Some(tag_line) = parse_tag_line(text) else {
            return Ok(());
        };

        if is_bare(&tag_line, "TEXT") {
            self.text.clear();
            self.state = State::Text;
            return Ok(());
        }

        if is_close(&tag_line, "DOCUMENT") {
            self.finish_document()?;
            self.state = State::Root;
            return Ok(());
        }

        if is_bare(&tag_line, "DOCUMENT") {
            if !self.options.lenient {
                return Err(DecodeError::Unterminated {
                    what: "<DOCUMENT>".to_string(),
                });
            }
            self.finish_document()?;
            self.begin_document();
            return Ok(());
        }

        let closes_root = match (&tag_line, self.root_tag.as_deref()) {
            (TagLine::Close { tag }, Some(root)) => tag.eq_ignore_ascii_case(root),
            _ => false,
        };
        if closes_root {
            if !self.options.lenient {
                return Err(DecodeError::Unterminated {
                    what: "<DOCUMENT>".to_string(),
                });
            }
            self.finish_document()?;
            hoist_to(&mut self.header, 1);
            self.close_root();
            return Ok(());
        }

        match tag_line {
            TagLine::Open { tag, value } => {
                if value.is_empty() {
                    self.document.push(Scope::new(tag));
                } else if let Some(top) = self.document.last_mut() {
                    top.map.insert(tag, Value::Scalar(value.to_string()));
                }
            }
            TagLine::Close { tag } => {
                // Depth 0 is the document itself, closed only by </DOCUMENT>.
                let depth = self
                    .document
                    .iter()
                    .rposition(|s| s.tag.eq_ignore_ascii_case(tag))
                    .filter(|depth| *depth > 0);
                if let Some(depth) = depth {
                    hoist_to(&mut self.document, depth + 1);
                    close_scope(&mut self.document);
                }
            }
        }
        Ok(())
    }

    fn colon_line(&mut self, raw: &[u8], text: &str) {
        let indent = raw.iter().take_while(|b| **b == b'\t').count();
        let Some((key, value)) = text.split_once(':') else {
            return;
        };
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        let value = value.trim();

        let Some(mut sections) = self.colon.take() else {
            return;
        };
        while sections.last().map_or(false, |s| s.indent >= indent) {
            if let Some(section) = sections.pop() {
                self.attach_section(&mut sections, section);
            }
        }

        if value.is_empty() {
            sections.push(ColonSection {
                indent,
                key: key.to_string(),
                map: OrderedMap::new(),
            });
        } else {
            let scalar = Value::Scalar(value.to_string());
            match sections.last_mut() {
                Some(section) => section.map.insert(key, scalar),
                None => self.header_insert(key, scalar),
            }
        }
        self.colon = Some(sections);
    }

    fn attach_section(&mut self, sections: &mut [ColonSection], section: ColonSection) {
        let value = if section.map.is_empty() {
            Value::Scalar(String::new())
        } else {
            Value::Map(section.map)
        };
        match sections.last_mut() {
            Some(parent) => parent.map.insert(section.key, value),
            None => self.header_insert(&section.key, value),
        }
    }

    fn end_colon_header(&mut self) {
        if let Some(mut sections) = self.colon.take() {
            while let Some(section) = sections.pop() {
                self.attach_section(&mut sections, section);
            }
        }
    }

    fn header_insert(&mut self, key: &str, value: Value) {
        if let Some(top) = self.header.last_mut() {
            top.map.insert(key, value);
        }
    }

    fn close_root(&mut self) {
        if let Some(root) = self.header.pop() {
            self.closed_header = Some(root.map);
        }
        self.state = State::Closed;
    }

    fn begin_document(&mut self) {
        self.document.clear();
        self.document.push(Scope::new("DOCUMENT"));
        self.text.clear();
        self.state = State::Document;
    }

    fn finish_document(&mut self) -> DecodeResult<()> {
        hoist_to(&mut self.document, 1);
        let fields = self
            .document
            .pop()
            .map(|scope| scope.map)
            .unwrap_or_default();
        self.document.clear();

        let has_identity = ["FILENAME", "SEQUENCE"]
            .iter()
            .any(|key| fields.get_str(key).map_or(false, |v| !v.is_empty()));
        if !has_identity {
            return Err(DecodeError::MissingIdentity {
                index: self.documents.len(),
            });
        }

        let text = std::mem::take(&mut self.text);
        let (content, uudecoded) = match uudecode::decode(&text)? {
            Some(bytes) => (bytes, true),
            None => (text, false),
        };

        self.documents.push(RawDocument {
            fields,
            content,
            uudecoded,
        });
        Ok(())
    }

    fn finish(mut self) -> DecodeResult<DecodedContainer> {
        let lenient = self.options.lenient;
        match self.state {
            State::Start => return Err(DecodeError::Empty),
            State::Text if !lenient => {
                return Err(DecodeError::Unterminated {
                    what: "<TEXT>".to_string(),
                })
            }
            State::Document if !lenient => {
                return Err(DecodeError::Unterminated {
                    what: "<DOCUMENT>".to_string(),
                })
            }
            State::Text | State::Document => self.finish_document()?,
            State::Root | State::Closed => {}
        }

        self.end_colon_header();
        let open_root = self.header.first().map(|scope| scope.tag.clone());
        if let Some(root) = open_root {
            if !lenient {
                return Err(DecodeError::Unterminated {
                    what: format!("<{}>", root),
                });
            }
            hoist_to(&mut self.header, 1);
            self.close_root();
        }

        Ok(DecodedContainer {
            root_tag: self.root_tag,
            header: self.closed_header.unwrap_or_default(),
            documents: self.documents,
        })
    }
}

/// Implicitly close every scope above `depth`. Each one becomes a flag in
/// its parent, followed by the entries it had collected.
fn hoist_to(stack: &mut Vec<Scope>, depth: usize) {
    while stack.len() > depth.max(1) {
        let Some(scope) = stack.pop() else { break };
        let Some(parent) = stack.last_mut() else { break };
        parent.map.insert(scope.tag, Value::Scalar(String::new()));
        for (key, value) in scope.map {
            match value {
                Value::List(items) => {
                    for item in items {
                        parent.map.insert(key.clone(), item);
                    }
                }
                other => parent.map.insert(key, other),
            }
        }
    }
}

/// Explicitly close the innermost scope into its parent
fn close_scope(stack: &mut Vec<Scope>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(scope) = stack.pop() {
        let value = if scope.map.is_empty() {
            Value::Scalar(String::new())
        } else {
            Value::Map(scope.map)
        };
        if let Some(parent) = stack.last_mut() {
            parent.map.insert(scope.tag, value);
        }
    }
}
