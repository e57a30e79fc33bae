use crate::document::{Hit, SourceRef, CITATION_KEY};
use serde_json::Value;
use std::collections::HashMap;

/// Assign `S1`, `S2`, ... per unique URL in first-seen order.
///
/// Hits sharing a URL share a marker, stored in the document metadata under
/// [`CITATION_KEY`]. Returns the annotated hits, one source per unique URL
/// and the URL → marker map.
pub fn bundle_citations(hits: Vec<Hit>) -> (Vec<Hit>, Vec<SourceRef>, HashMap<String, String>) {
    let mut markers: HashMap<String, String> = HashMap::new();
    let mut sources: Vec<SourceRef> = Vec::new();

    let hits = hits
        .into_iter()
        .map(|mut hit| {
            let url = hit.document.url.clone();
            let marker = markers
                .entry(url.clone())
                .or_insert_with(|| {
                    let marker = format!("S{}", sources.len() + 1);
                    sources.push(SourceRef {
                        marker: marker.clone(),
                        url,
                        title: hit.document.title.clone(),
                        domain: hit.document.domain.clone(),
                    });
                    marker
                })
                .clone();
            hit.document
                .metadata
                .insert(CITATION_KEY.to_string(), Value::String(marker));
            hit
        })
        .collect();

    (hits, sources, markers)
}
