//! Composite read handle: fan a query over every shard and merge.
//!
//! Readers always see the union of all shards. Each shard reader uses a
//! manual reload policy, so the fan-out reloads before searching and a
//! flush becomes visible to the very next query.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tantivy::collector::{Count, FacetCollector, TopDocs};
use tantivy::schema::Document as _;
use tantivy::TantivyDocument;

use kiroku_core::{Error, Result};

use crate::codec::{FacetResult, Hit, SearchRequest, ID_FIELD};
use crate::shard::Shard;

pub(crate) struct SearchOutput {
    /// Total matching documents across all shards, before paging.
    pub total: usize,
    pub hits: Vec<Hit>,
    pub facets: Vec<FacetResult>,
}

/// Execute a request against every shard and merge the results.
///
/// Each shard contributes its top `offset + limit` hits; the merged list
/// is ordered by descending score (ties keep shard order, which keeps
/// paging deterministic) and paged globally. Facet counts are summed
/// across shards per requested root path.
pub(crate) fn search_shards(shards: &[Shard], request: &SearchRequest) -> Result<SearchOutput> {
    let fetch = (request.offset + request.limit).max(1);

    let mut total = 0usize;
    let mut merged: Vec<Hit> = Vec::new();
    let mut facet_totals: Vec<BTreeMap<String, u64>> =
        vec![BTreeMap::new(); request.facets.len()];

    for shard in shards {
        shard
            .reader
            .reload()
            .map_err(|e| Error::engine(format!("cannot refresh shard {}", shard.name), e))?;
        let searcher = shard.reader.searcher();
        let schema = shard.index.schema();

        let (count, top) = searcher
            .search(request.query.as_ref(), &(Count, TopDocs::with_limit(fetch)))
            .map_err(|e| Error::engine(format!("search failed on shard {}", shard.name), e))?;
        total += count;

        for (score, address) in top {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::engine(format!("cannot load hit from {}", shard.name), e))?;
            let named = doc.to_named_doc(&schema);
            let doc = serde_json::to_value(&named)
                .map_err(|e| Error::codec(format!("cannot render stored document: {e}")))?;
            let id = doc
                .get(ID_FIELD)
                .and_then(|values| values.get(0))
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            merged.push(Hit { id, score, doc });
        }

        for (slot, facet_request) in request.facets.iter().enumerate() {
            if schema.get_field(&facet_request.field).is_err() {
                continue;
            }
            let mut collector = FacetCollector::for_field(&facet_request.field);
            collector.add_facet(&facet_request.path);
            let counts = searcher
                .search(request.query.as_ref(), &collector)
                .map_err(|e| Error::engine(format!("facet search failed on {}", shard.name), e))?;
            for (facet, count) in counts.get(&facet_request.path) {
                *facet_totals[slot].entry(facet.to_string()).or_insert(0) += count;
            }
        }
    }

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let hits = merged
        .into_iter()
        .skip(request.offset)
        .take(request.limit)
        .collect();

    let facets = request
        .facets
        .iter()
        .zip(facet_totals)
        .map(|(facet_request, counts)| FacetResult {
            field: facet_request.field.clone(),
            path: facet_request.path.clone(),
            counts: counts.into_iter().collect(),
        })
        .collect();

    Ok(SearchOutput { total, hits, facets })
}
