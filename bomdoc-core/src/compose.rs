//! Page Compositor - Extract and Merge
//!
//! Copies designated pages out of independently rendered PDFs into one output
//! document, in the order given. Content streams are copied as-is, never
//! re-rendered. The output holds its own copies of every object it uses.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

use crate::error::{PipelineError, Result};
use crate::render::RenderedPage;

/// Keys a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Capability set any page-accurate document library can provide.
pub trait PageAssembler {
    type Source;
    type Output;

    fn load(&self, bytes: &[u8]) -> Result<Self::Source>;
    fn page_count(&self, source: &Self::Source) -> usize;
    fn new_output(&self) -> Self::Output;
    /// Copies page `index` (zero-based) of `source` to the end of `output`.
    fn append_page(&self, output: &mut Self::Output, source: &Self::Source, index: usize) -> Result<()>;
    fn serialize(&self, output: Self::Output) -> Result<Vec<u8>>;
}

/// One entry of the composition order.
#[derive(Debug, Clone)]
pub struct PageSelection {
    pub page: RenderedPage,
    pub index: usize,
    /// The source must consist of exactly this one page.
    pub sole: bool,
}

impl PageSelection {
    pub fn new(page: RenderedPage, index: usize) -> Self {
        Self {
            page,
            index,
            sole: false,
        }
    }

    /// A rendered page that must have printed to a single page. Content that
    /// spilled onto further pages fails the composition instead of being
    /// dropped.
    pub fn sole_page(page: RenderedPage) -> Self {
        Self {
            page,
            index: 0,
            sole: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    /// Template id of every output page, in page order.
    pub page_order: Vec<String>,
}

impl AssembledDocument {
    pub fn page_count(&self) -> usize {
        self.page_order.len()
    }
}

/// Assembles `selections` in order. Any bad source or index fails the whole
/// composition.
pub fn compose<A: PageAssembler>(
    assembler: &A,
    selections: Vec<PageSelection>,
) -> Result<AssembledDocument> {
    let mut output = assembler.new_output();
    let mut page_order = Vec::with_capacity(selections.len());

    for (position, selection) in selections.into_iter().enumerate() {
        let source = assembler.load(&selection.page.bytes).map_err(|e| {
            PipelineError::composition(format!(
                "source {} ('{}') is not a valid document: {e}",
                position, selection.page.template_id
            ))
        })?;

        let available = assembler.page_count(&source);
        if selection.sole && available != 1 {
            return Err(PipelineError::composition(format!(
                "'{}' printed to {} pages; it must fit on exactly one",
                selection.page.template_id, available
            )));
        }
        if selection.index >= available {
            return Err(PipelineError::composition(format!(
                "page {} out of range for '{}' (document has {} page{})",
                selection.index,
                selection.page.template_id,
                available,
                if available == 1 { "" } else { "s" }
            )));
        }

        assembler.append_page(&mut output, &source, selection.index)?;
        page_order.push(selection.page.template_id);
    }

    let bytes = assembler.serialize(output)?;
    log::debug!("Composed {} pages ({} bytes)", page_order.len(), bytes.len());
    Ok(AssembledDocument { bytes, page_order })
}

/// `lopdf`-backed assembler.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfAssembler;

/// Output under construction: the document plus its reserved page tree root.
#[derive(Debug)]
pub struct LopdfOutput {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

fn lopdf_err(err: lopdf::Error) -> PipelineError {
    PipelineError::composition(format!("pdf error: {err}"))
}

impl PageAssembler for LopdfAssembler {
    type Source = Document;
    type Output = LopdfOutput;

    fn load(&self, bytes: &[u8]) -> Result<Document> {
        let doc = Document::load_mem(bytes).map_err(lopdf_err)?;
        if doc.is_encrypted() {
            return Err(PipelineError::composition("source document is encrypted"));
        }
        Ok(doc)
    }

    fn page_count(&self, source: &Document) -> usize {
        source.get_pages().len()
    }

    fn new_output(&self) -> LopdfOutput {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        LopdfOutput {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    fn append_page(&self, output: &mut LopdfOutput, source: &Document, index: usize) -> Result<()> {
        let pages = source.get_pages();
        let page_id = pages
            .values()
            .nth(index)
            .copied()
            .ok_or_else(|| PipelineError::composition(format!("page {index} out of range")))?;

        let mut page = flatten_page(source, page_id)?;
        page.remove(b"Parent");

        // Allocate ids in the output for everything the page reaches
        let reachable = collect_reachable(source, &Object::Dictionary(page.clone()));
        let mut remap = BTreeMap::new();
        for id in &reachable {
            remap.insert(*id, output.doc.new_object_id());
        }

        for id in &reachable {
            let object = source.get_object(*id).map_err(lopdf_err)?;
            let copied = renumber(object.clone(), &remap);
            output.doc.objects.insert(remap[id], copied);
        }

        let mut page = renumber_dict(page, &remap);
        page.set("Parent", output.pages_id);
        let new_page_id = output.doc.add_object(page);
        output.kids.push(Object::Reference(new_page_id));
        Ok(())
    }

    fn serialize(&self, mut output: LopdfOutput) -> Result<Vec<u8>> {
        let count = output.kids.len() as i64;
        output.doc.objects.insert(
            output.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => output.kids,
                "Count" => count,
            }),
        );
        let catalog_id = output.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => output.pages_id,
        });
        output.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        output.doc.save_to(&mut bytes).map_err(|e| {
            PipelineError::composition(format!("failed to serialize output: {e}"))
        })?;
        Ok(bytes)
    }
}

/// The page dictionary with inherited attributes pulled down from its
/// ancestors, so the page stands alone once detached from its tree.
fn flatten_page(source: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut page = source.get_dictionary(page_id).map_err(lopdf_err)?.clone();

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(parent_id) = parent {
        depth += 1;
        if depth > 64 {
            return Err(PipelineError::composition("page tree is too deep or cyclic"));
        }
        let node = source.get_dictionary(parent_id).map_err(lopdf_err)?;
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(page)
}

/// Every object id reachable from `root`, not following `Parent` links back
/// into the source page tree.
fn collect_reachable(source: &Document, root: &Object) -> Vec<ObjectId> {
    let mut reachable = Vec::new();
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    push_references(root, &mut queue);

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(object) = source.get_object(id) else {
            continue;
        };
        if is_page_tree_node(object) {
            continue;
        }
        reachable.push(id);
        push_references(object, &mut queue);
    }
    reachable
}

fn is_page_tree_node(object: &Object) -> bool {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        _ => return false,
    };
    matches!(dict.get(b"Type").and_then(Object::as_name), Ok(b"Pages") | Ok(b"Page"))
}

fn push_references(object: &Object, queue: &mut VecDeque<ObjectId>) {
    match object {
        Object::Reference(id) => queue.push_back(*id),
        Object::Array(items) => items.iter().for_each(|o| push_references(o, queue)),
        Object::Dictionary(dict) => dict
            .iter()
            .filter(|(key, _)| key.as_slice() != b"Parent".as_slice())
            .for_each(|(_, o)| push_references(o, queue)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, o)| push_references(o, queue)),
        _ => {}
    }
}

/// Rewrites references through `remap`. Links to objects that were not
/// copied (other pages, the source tree) become null.
fn renumber(object: Object, remap: &BTreeMap<ObjectId, ObjectId>) -> Object {
    match object {
        Object::Reference(id) => match remap.get(&id) {
            Some(new_id) => Object::Reference(*new_id),
            None => Object::Null,
        },
        Object::Array(items) => {
            Object::Array(items.into_iter().map(|o| renumber(o, remap)).collect())
        }
        Object::Dictionary(dict) => Object::Dictionary(renumber_dict(dict, remap)),
        Object::Stream(mut stream) => {
            stream.dict = renumber_dict(std::mem::take(&mut stream.dict), remap);
            Object::Stream(stream)
        }
        other => other,
    }
}

fn renumber_dict(mut dict: Dictionary, remap: &BTreeMap<ObjectId, ObjectId>) -> Dictionary {
    for (_, value) in dict.iter_mut() {
        *value = renumber(std::mem::replace(value, Object::Null), remap);
    }
    dict
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Stream;

    /// A PDF with one page per entry in `texts`.
    fn make_pdf(texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = vec![];
        for text in texts {
            let content = format!("BT /F1 18 Tf 72 720 Td ({text}) Tj ET").into_bytes();
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        // Resources and MediaBox only on the tree root, to exercise inheritance
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => texts.len() as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn rendered(id: &str, bytes: Vec<u8>) -> RenderedPage {
        RenderedPage {
            template_id: id.to_string(),
            bytes,
        }
    }

    fn page_contents(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(*id).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn test_compose_selected_pages_in_order() {
        let a = make_pdf(&["A0", "A1"]);
        let b = make_pdf(&["B0", "B1", "B2"]);

        let doc = compose(
            &LopdfAssembler,
            vec![
                PageSelection::new(rendered("a", a), 0),
                PageSelection::new(rendered("b", b), 2),
            ],
        )
        .unwrap();

        assert_eq!(doc.page_order, vec!["a", "b"]);
        let contents = page_contents(&doc.bytes);
        assert_eq!(contents.len(), 2);
        assert!(contents[0].contains("(A0)"));
        assert!(contents[1].contains("(B2)"));
    }

    #[test]
    fn test_inherited_attributes_travel_with_page() {
        let doc = compose(
            &LopdfAssembler,
            vec![PageSelection::sole_page(rendered("a", make_pdf(&["A0"])))],
        )
        .unwrap();

        let out = Document::load_mem(&doc.bytes).unwrap();
        let page_id = *out.get_pages().values().next().unwrap();
        let page = out.get_dictionary(page_id).unwrap();
        assert!(page.has(b"MediaBox"));
        let resources_id = page.get(b"Resources").unwrap().as_reference().unwrap();
        let resources = out.get_dictionary(resources_id).unwrap();
        assert!(resources.has(b"Font"));
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let err = compose(
            &LopdfAssembler,
            vec![PageSelection::new(rendered("a", make_pdf(&["A0"])), 1)],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Composition(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_garbage_source_fails() {
        let err = compose(
            &LopdfAssembler,
            vec![PageSelection::sole_page(rendered("a", b"not a pdf".to_vec()))],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Composition(_)));
    }

    #[test]
    fn test_unselected_pages_are_not_copied() {
        let doc = compose(
            &LopdfAssembler,
            vec![PageSelection::new(rendered("a", make_pdf(&["A0", "A1", "A2"])), 0)],
        )
        .unwrap();
        let contents = page_contents(&doc.bytes);
        assert_eq!(contents.len(), 1);
        assert!(!String::from_utf8_lossy(&doc.bytes).contains("(A1)"));
    }

    #[test]
    fn test_sole_page_rejects_overflowing_source() {
        let err = compose(
            &LopdfAssembler,
            vec![
                PageSelection::sole_page(rendered("cover", make_pdf(&["C0"]))),
                PageSelection::sole_page(rendered("table", make_pdf(&["T0", "T1", "T2"]))),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Composition(_)));
        assert!(err.to_string().contains("'table' printed to 3 pages"));
    }
}
