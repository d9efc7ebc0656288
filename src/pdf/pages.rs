//! Page tree traversal and page range selection

use std::collections::HashSet;

use log::warn;

use crate::error::{PDFError, PDFResult};
use super::{Document, Object, ObjectId};

/// Page attributes a page may inherit from its ancestors
pub const INHERITABLE_ATTRIBUTES: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

impl Document {
    /// Reference to the root `Pages` node
    pub fn pages_root(&mut self) -> PDFResult<ObjectId> {
        let catalog = self.catalog()?;
        catalog
            .as_dict()?
            .get_reference("Pages")
            .ok_or_else(|| PDFError::malformed(0, "Catalog has no /Pages reference"))
    }

    /// Every page in document order
    pub fn page_ids(&mut self) -> PDFResult<Vec<ObjectId>> {
        let root = self.pages_root()?;
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            if !visited.insert(id.number) {
                warn!("Page tree visits {} twice, skipping", id);
                continue;
            }
            let node = self.resolve(id)?;
            let dict = node.as_dict()?;

            match dict.get("Kids") {
                Some(Object::Array(kids)) if !dict.is_name("Type", "Page") => {
                    for kid in kids.iter().rev() {
                        match kid {
                            Object::Reference(kid) => stack.push(*kid),
                            other => warn!("Ignoring {} in /Kids of {}", other.type_name(), id),
                        }
                    }
                }
                _ => pages.push(id),
            }
        }
        Ok(pages)
    }

    pub fn page_count(&mut self) -> PDFResult<usize> {
        Ok(self.page_ids()?.len())
    }

    /// Value of `key` on `page` or the nearest ancestor defining it
    pub fn inherited_attribute(&mut self, page: ObjectId, key: &str) -> PDFResult<Option<Object>> {
        let mut visited = HashSet::new();
        let mut current = page;
        loop {
            if !visited.insert(current.number) {
                return Ok(None);
            }
            let node = self.resolve(current)?;
            let dict = node.as_dict()?;
            if let Some(value) = dict.get(key) {
                return Ok(Some(value.clone()));
            }
            match dict.get_reference("Parent") {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }
}

/// Parse a page selection such as `1-3,5,N`
///
/// Pages are 1-based, `N` is the last page and a range may run backwards
/// (`5-3` is pages 5, 4, 3). Returns page numbers in selection order.
pub fn parse_page_ranges(selection: &str, page_count: usize) -> PDFResult<Vec<usize>> {
    let mut pages = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (first, last) = match part.split_once('-') {
            Some((a, b)) => (page_number(a, page_count, part)?, page_number(b, page_count, part)?),
            None => {
                let page = page_number(part, page_count, part)?;
                (page, page)
            }
        };
        if first <= last {
            pages.extend(first..=last);
        } else {
            pages.extend((last..=first).rev());
        }
    }
    if pages.is_empty() {
        return Err(PDFError::malformed(0, format!("Page selection '{}' selects nothing", selection)));
    }
    Ok(pages)
}

fn page_number(token: &str, page_count: usize, range: &str) -> PDFResult<usize> {
    let token = token.trim();
    let page = if token.eq_ignore_ascii_case("N") {
        page_count
    } else {
        token
            .parse::<usize>()
            .map_err(|_| PDFError::malformed(0, format!("Invalid page range '{}'", range)))?
    };
    if page == 0 || page > page_count {
        return Err(PDFError::malformed(
            0,
            format!("Page range '{}' outside 1-{}", range, page_count),
        ));
    }
    Ok(page)
}
