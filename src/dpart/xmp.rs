//! XMP packet handling for the document-part metadata.
//!
//! The root node of the part tree carries the archive-level XMP packet.
//! Its values are reconciled with whatever the renderer already wrote to
//! the document information dictionary: the packet wins field by field,
//! except keywords, which become the order-preserving union of both
//! sides. The reconciled values are written back to `/Info`, and the
//! packet itself is patched in place (no elements are added to it).

use std::io::Cursor;

use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Object};
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::document::session::text_string;
use crate::error::{Error, Result};
use crate::utils::pdf_date;

/// Fields lifted from an XMP packet. All optional; a packet that carries
/// none of them is still valid.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct XmpFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub producer: Option<String>,
    pub creator_tool: Option<String>,
    pub create_date: Option<String>,
    pub modify_date: Option<String>,
}

/// Extracts the known properties from an XMP packet. Only the element
/// form is recognized; `dc:title` and `dc:description` take the first
/// `rdf:li` of their language alternative.
pub fn parse_packet(xml: &str) -> Result<XmpFields> {
    let mut reader = Reader::from_str(xml);

    let mut fields = XmpFields::default();
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => path.push(local_name(e.name().as_ref()).to_vec()),
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| Error::Xml(err.to_string()))?;
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                if let Some(slot) = field_slot(&mut fields, &path) {
                    slot.get_or_insert(value.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::Xml(err.to_string())),
            Ok(_) => {}
        }
    }
    Ok(fields)
}

/// Patches the text of properties already present in the packet; elements
/// the packet lacks are left out rather than invented.
pub fn rewrite_packet(xml: &str, fields: &XmpFields) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut replaced = [false; FIELD_COUNT];

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => event,
            Err(err) => return Err(Error::Xml(err.to_string())),
        };
        match &event {
            Event::Start(e) => path.push(local_name(e.name().as_ref()).to_vec()),
            Event::End(_) => {
                path.pop();
            }
            Event::Text(_) => {
                if let Some(index) = field_index(&path) {
                    let value = field_of(fields, index);
                    if let (Some(value), false) = (value, replaced[index]) {
                        replaced[index] = true;
                        writer
                            .write_event(Event::Text(BytesText::new(value)))
                            .map_err(|err| Error::Xml(err.to_string()))?;
                        continue;
                    }
                }
            }
            _ => {}
        }
        writer
            .write_event(event)
            .map_err(|err| Error::Xml(err.to_string()))?;
    }
    String::from_utf8(writer.into_inner().into_inner()).map_err(|err| Error::Xml(err.to_string()))
}

/// Reconciles packet fields with the information dictionary. The packet
/// wins wherever it has a value; keywords merge as a comma union keeping
/// the packet's order first.
pub fn merge_with_info(fields: &XmpFields, info: &Dictionary) -> XmpFields {
    let info_text = |key: &[u8]| info.get(key).ok().and_then(text_string);
    XmpFields {
        title: fields.title.clone().or_else(|| info_text(b"Title")),
        description: fields.description.clone().or_else(|| info_text(b"Subject")),
        keywords: union_keywords(fields.keywords.as_deref(), info_text(b"Keywords").as_deref()),
        producer: fields.producer.clone().or_else(|| info_text(b"Producer")),
        creator_tool: fields.creator_tool.clone().or_else(|| info_text(b"Creator")),
        create_date: fields.create_date.clone(),
        modify_date: fields.modify_date.clone(),
    }
}

/// Writes the reconciled values into the information dictionary. Dates
/// arrive in the packet's ISO form and are converted; info entries keep
/// their existing value when the packet had no date.
pub fn apply_to_info(fields: &XmpFields, info: &mut Dictionary) {
    let mut set = |key: &str, value: &Option<String>| {
        if let Some(value) = value {
            info.set(key, Object::string_literal(value.as_str()));
        }
    };
    set("Title", &fields.title);
    set("Subject", &fields.description);
    set("Keywords", &fields.keywords);
    set("Producer", &fields.producer);
    set("Creator", &fields.creator_tool);
    set(
        "CreationDate",
        &fields.create_date.as_deref().and_then(iso_to_pdf_date),
    );
    set(
        "ModDate",
        &fields.modify_date.as_deref().and_then(iso_to_pdf_date),
    );
}

fn iso_to_pdf_date(iso: &str) -> Option<String> {
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(iso).ok()?.into();
    Some(pdf_date(&parsed))
}

fn union_keywords(packet: Option<&str>, info: Option<&str>) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for source in [packet, info].into_iter().flatten() {
        for term in source.split(',') {
            let term = term.trim();
            if !term.is_empty() && !terms.iter().any(|t| t == term) {
                terms.push(term.to_string());
            }
        }
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(", "))
    }
}

fn local_name(qname: &[u8]) -> &[u8] {
    match qname.iter().rposition(|&b| b == b':') {
        Some(pos) => &qname[pos + 1..],
        None => qname,
    }
}

const FIELD_COUNT: usize = 7;

/// Maps the current element path to the packet field it carries, if any.
fn field_index(path: &[Vec<u8>]) -> Option<usize> {
    let last = path.last()?.as_slice();
    let inside = |name: &[u8]| path.iter().any(|p| p == name);
    match last {
        b"li" if inside(b"title") => Some(0),
        b"li" if inside(b"description") => Some(1),
        b"Keywords" => Some(2),
        b"Producer" => Some(3),
        b"CreatorTool" => Some(4),
        b"CreateDate" => Some(5),
        b"ModifyDate" => Some(6),
        _ => None,
    }
}

fn field_of(fields: &XmpFields, index: usize) -> Option<&str> {
    [
        &fields.title,
        &fields.description,
        &fields.keywords,
        &fields.producer,
        &fields.creator_tool,
        &fields.create_date,
        &fields.modify_date,
    ][index]
        .as_deref()
}

fn field_slot<'f>(fields: &'f mut XmpFields, path: &[Vec<u8>]) -> Option<&'f mut Option<String>> {
    match field_index(path)? {
        0 => Some(&mut fields.title),
        1 => Some(&mut fields.description),
        2 => Some(&mut fields.keywords),
        3 => Some(&mut fields.producer),
        4 => Some(&mut fields.creator_tool),
        5 => Some(&mut fields.create_date),
        6 => Some(&mut fields.modify_date),
        _ => None,
    }
}
