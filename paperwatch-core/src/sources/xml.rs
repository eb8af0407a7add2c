//! Event-driven reading of the arXiv Atom and RSS documents on quick-xml.
//!
//! Both formats are a flat list of records (`<entry>` or `<item>`) whose
//! children are at most two levels deep, so a document is read into plain
//! [`Record`]s of named [`Field`]s instead of a general tree.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// One closed element: its path below the enclosing record (or below the
/// document when outside any record), attributes, and trimmed text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    /// Qualified names joined with `/`, e.g. `author/name`.
    pub path: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
}

impl Field {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<Field>,
}

impl Record {
    pub fn elements<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.path == path)
    }

    /// Text of the first element at `path`.
    pub fn text(&self, path: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.text.as_str())
    }

    pub fn texts<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.elements(path).map(|f| f.text.as_str())
    }

    /// Whether any element with this local (last path segment) name closed.
    pub fn contains(&self, name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.path.rsplit('/').next() == Some(name))
    }
}

/// A document split into records and everything outside them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlDocument {
    /// Name of the outermost element.
    pub root: Option<String>,
    /// Elements outside any record, with paths from the document root.
    pub top: Record,
    pub records: Vec<Record>,
    /// First well-formedness problem. Records read before it are kept.
    pub error: Option<String>,
}

struct OpenElement {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
}

impl OpenElement {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let attrs = e
            .attributes()
            .flatten()
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                let value = match a.unescape_value() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
                };
                (key, value)
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            attrs,
            text: String::new(),
        }
    }
}

struct DocumentBuilder<'a> {
    record_tag: &'a str,
    stack: Vec<OpenElement>,
    /// Stack index of the record element currently open.
    record_depth: Option<usize>,
    current: Record,
    doc: XmlDocument,
}

impl<'a> DocumentBuilder<'a> {
    fn new(record_tag: &'a str) -> Self {
        Self {
            record_tag,
            stack: Vec::new(),
            record_depth: None,
            current: Record::default(),
            doc: XmlDocument::default(),
        }
    }

    fn open(&mut self, element: OpenElement) {
        if self.stack.is_empty() && self.doc.root.is_none() {
            self.doc.root = Some(element.name.clone());
        }
        if self.record_depth.is_none() && element.name == self.record_tag {
            self.record_depth = Some(self.stack.len());
            self.current = Record::default();
        }
        self.stack.push(element);
    }

    fn text(&mut self, text: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.text.push_str(text);
        }
    }

    fn close(&mut self) {
        let Some(element) = self.stack.pop() else {
            return;
        };
        let depth = self.stack.len();
        let (prefix, target) = match self.record_depth {
            Some(d) if d == depth => {
                self.record_depth = None;
                self.doc.records.push(std::mem::take(&mut self.current));
                return;
            }
            Some(d) => (&self.stack[d + 1..], &mut self.current),
            None => (&self.stack[..], &mut self.doc.top),
        };
        let path = prefix
            .iter()
            .map(|o| o.name.as_str())
            .chain([element.name.as_str()])
            .collect::<Vec<_>>()
            .join("/");
        target.fields.push(Field {
            path,
            attrs: element.attrs,
            text: element.text.trim().to_string(),
        });
    }

    fn note_error(&mut self, message: String) {
        self.doc.error.get_or_insert(message);
    }
}

/// Read `xml`, collecting every `record_tag` element as a [`Record`].
/// Never fails; problems are reported through [`XmlDocument::error`].
pub fn read_document(xml: &str, record_tag: &str) -> XmlDocument {
    let mut reader = Reader::from_str(xml);
    let mut builder = DocumentBuilder::new(record_tag);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => builder.open(OpenElement::from_start(&e)),
            Ok(Event::Empty(e)) => {
                builder.open(OpenElement::from_start(&e));
                builder.close();
            }
            Ok(Event::End(_)) => builder.close(),
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(text) => builder.text(&text),
                Err(err) => {
                    builder.note_error(format!(
                        "bad character data at byte {}: {}",
                        reader.buffer_position(),
                        err
                    ));
                    builder.text(&String::from_utf8_lossy(&e));
                }
            },
            // CDATA is literal; no entity decoding.
            Ok(Event::CData(e)) => builder.text(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                builder.note_error(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    err
                ));
                break;
            }
        }
    }

    if let Some(open) = builder.stack.last() {
        let message = format!("document ended inside <{}>", open.name);
        builder.note_error(message);
    }
    builder.doc
}
