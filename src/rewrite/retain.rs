//! Reduce a document to a page subset

use std::collections::HashSet;

use log::{debug, warn};

use crate::error::{PDFError, PDFResult};
use crate::pdf::{parse_page_ranges, Dictionary, Document, Object, ObjectId, INHERITABLE_ATTRIBUTES};

/// Keep only the pages named by `selection`, in selection order
///
/// Kept pages receive their inherited attributes and hang directly off the
/// root `Pages` node. The catalog is reduced to `/Type` and `/Pages`, so
/// outlines, forms and other page-addressed structures are dropped. Pages
/// selected twice are kept once. Returns the number of pages kept.
pub fn retain_pages(doc: &mut Document, selection: &str) -> PDFResult<usize> {
    let pages = doc.page_ids()?;
    let indices = parse_page_ranges(selection, pages.len())?;
    let root = doc.pages_root()?;

    let mut seen = HashSet::new();
    let mut kept: Vec<ObjectId> = Vec::with_capacity(indices.len());
    for index in indices {
        let page = pages[index - 1];
        if seen.insert(page.number) {
            kept.push(page);
        } else {
            warn!("Page {} selected more than once, keeping the first", index);
        }
    }

    for &page in &kept {
        flatten_page(doc, page, root)?;
    }

    let mut node = doc.resolve(root)?.as_dict()?.clone();
    node.set("Type", Object::name("Pages"));
    node.set("Kids", kept.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>());
    node.set("Count", kept.len());
    node.remove("Parent");
    doc.update_object(root.number, Object::Dictionary(node));

    reduce_catalog(doc, root);
    debug!("Kept {} of {} pages", kept.len(), pages.len());
    Ok(kept.len())
}

/// Copy inherited attributes onto `page` and parent it to `root`
fn flatten_page(doc: &mut Document, page: ObjectId, root: ObjectId) -> PDFResult<()> {
    let mut dict = doc.resolve(page)?.as_dict()?.clone();
    for key in INHERITABLE_ATTRIBUTES {
        if dict.has(key) {
            continue;
        }
        if let Some(value) = doc.inherited_attribute(page, key)? {
            dict.set(key, value);
        }
    }
    dict.set("Parent", root);
    doc.update_object(page.number, Object::Dictionary(dict));
    Ok(())
}

fn reduce_catalog(doc: &mut Document, root: ObjectId) {
    let Some(catalog_id) = doc.trailer().get_reference("Root") else {
        warn!("Catalog is not an indirect object, leaving it unchanged");
        return;
    };
    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::name("Catalog"));
    catalog.set("Pages", root);
    doc.update_object(catalog_id.number, Object::Dictionary(catalog));
}
