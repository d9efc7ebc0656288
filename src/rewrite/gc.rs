//! Reachability sweep from the trailer

use std::collections::BTreeSet;

use log::{debug, trace, warn};

use crate::pdf::{Dictionary, Document, Object, ObjectId};

/// Collect every object number reachable from `trailer`
///
/// References are followed through dictionaries, arrays and stream
/// dictionaries, never through stream payloads. An indirect `/Length` that
/// resolves to an integer is written into the stream dictionary and its
/// object is not marked. Targets that cannot be loaded stay unmarked.
pub fn sweep(doc: &mut Document, trailer: &Dictionary) -> BTreeSet<u32> {
    let mut marked = BTreeSet::new();
    let mut pending: Vec<ObjectId> = Object::Dictionary(trailer.clone()).references();
    pending.reverse();

    while let Some(id) = pending.pop() {
        if marked.contains(&id.number) {
            continue;
        }
        let object = match doc.resolve(id) {
            Ok(object) => object,
            Err(e) => {
                warn!("Unreachable reference {}: {}", id, e);
                continue;
            }
        };
        marked.insert(id.number);
        trace!("Marked {}", id);

        let mut refs = match bake_length(doc, id.number, &object) {
            Some(baked) => baked.references(),
            None => object.references(),
        };
        refs.reverse();
        pending.extend(refs);
    }

    debug!("Sweep reached {} objects", marked.len());
    marked
}

/// Inline an indirect `/Length` of a stream, updating the store
fn bake_length(doc: &mut Document, number: u32, object: &Object) -> Option<Object> {
    let Object::Stream(stream) = object else {
        return None;
    };
    let length_id = stream.dict.get_reference("Length")?;

    let length = match doc.resolve(length_id) {
        Ok(value) => value.as_i64().ok()?,
        Err(e) => {
            warn!("Keeping indirect /Length {} of {}: {}", length_id, number, e);
            return None;
        }
    };

    let mut stream = stream.clone();
    stream.dict.set("Length", length);
    let baked = Object::Stream(stream);
    doc.update_object(number, baked.clone());
    Some(baked)
}
