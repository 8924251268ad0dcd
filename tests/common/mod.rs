//! Synthetic rendered-archive documents for the integration tests.
//!
//! Builds the object graph a typesetting engine leaves behind: pages with
//! navigation links, a named-destination tree, filespec objects with
//! embedded streams on the catalog associated-files list, and a producer
//! string in the information dictionary.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

pub struct ArchiveBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    dests: Vec<(String, ObjectId)>,
    af: Vec<ObjectId>,
    producer: String,
}

impl ArchiveBuilder {
    pub fn new(page_count: usize) -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_ids: Vec<ObjectId> = (0..page_count)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Resources" => dictionary! {
                        "ProcSet" => vec!["PDF".into(), "Text".into()],
                    },
                })
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => page_count as i64,
            }),
        );
        Self {
            doc,
            pages_id,
            page_ids,
            dests: Vec::new(),
            af: Vec::new(),
            producer: "Apache FOP Version 2.8".to_string(),
        }
    }

    pub fn producer(&mut self, producer: &str) -> &mut Self {
        self.producer = producer.to_string();
        self
    }

    /// Registers a named destination pointing at a 1-based page.
    pub fn dest(&mut self, name: &str, page: usize) -> &mut Self {
        let page_id = self.page_ids[page - 1];
        self.dests.push((name.to_string(), page_id));
        self
    }

    /// Adds a filespec with an embedded stream to the associated-files
    /// list, the way the renderer writes them: `/F` and `/UF` carry the
    /// grouping name, `/EF /F` the stream.
    pub fn filespec(&mut self, name: &str, desc: &str, content: &[u8]) -> (ObjectId, ObjectId) {
        let stream_id = self.doc.add_object(Object::Stream(Stream::new(
            dictionary! { "Type" => "EmbeddedFile" },
            content.to_vec(),
        )));
        let fs_id = self.doc.add_object(dictionary! {
            "Type" => "Filespec",
            "F" => Object::string_literal(name),
            "UF" => Object::string_literal(name),
            "Desc" => Object::string_literal(desc),
            "EF" => dictionary! { "F" => Object::Reference(stream_id) },
        });
        self.af.push(fs_id);
        (fs_id, stream_id)
    }

    /// Adds a navigation link annotation on a 1-based page, targeting a
    /// named destination through a go-to action.
    pub fn link(&mut self, page: usize, dest: &str) -> ObjectId {
        let annot_id = self.doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![72.into(), 72.into(), 144.into(), 96.into()],
            "Border" => vec![0.into(), 0.into(), 0.into()],
            "A" => dictionary! {
                "S" => "GoTo",
                "D" => Object::string_literal(dest),
            },
        });
        let page_id = self.page_ids[page - 1];
        let page_dict = self
            .doc
            .get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap();
        match page_dict.get_mut(b"Annots") {
            Ok(Object::Array(annots)) => annots.push(Object::Reference(annot_id)),
            _ => page_dict.set("Annots", vec![Object::Reference(annot_id)]),
        }
        annot_id
    }

    pub fn build(mut self) -> Document {
        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        };

        if !self.dests.is_empty() {
            self.dests.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            let mut names = Vec::with_capacity(self.dests.len() * 2);
            for (name, page_id) in &self.dests {
                names.push(Object::string_literal(name.as_str()));
                names.push(Object::Array(vec![
                    Object::Reference(*page_id),
                    "XYZ".into(),
                    Object::Null,
                    Object::Null,
                    Object::Null,
                ]));
            }
            let dests_id = self.doc.add_object(dictionary! { "Names" => names });
            catalog.set(
                "Names",
                Object::Dictionary(dictionary! { "Dests" => Object::Reference(dests_id) }),
            );
        }

        if !self.af.is_empty() {
            let af: Vec<Object> = self.af.iter().map(|id| Object::Reference(*id)).collect();
            catalog.set("AF", Object::Array(af));
        }

        let catalog_id = self.doc.add_object(Object::Dictionary(catalog));
        self.doc.trailer.set("Root", catalog_id);

        let mut info = Dictionary::new();
        info.set("Producer", Object::string_literal(self.producer.as_str()));
        let info_id = self.doc.add_object(Object::Dictionary(info));
        self.doc.trailer.set("Info", Object::Reference(info_id));

        self.doc
    }
}

/// Root XMP packet used across the integration tests.
pub const ROOT_PACKET: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:dc="http://purl.org/dc/elements/1.1/"
        xmlns:pdf="http://ns.adobe.com/pdf/1.3/">
      <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Account of Jane Doe</rdf:li></rdf:Alt></dc:title>
      <pdf:Keywords>email archive</pdf:Keywords>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>"#;
