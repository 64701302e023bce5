//! Codec layer between opaque caller payloads and engine documents.
//!
//! A [`Codec`] owns the document schema and translates in both directions:
//! payloads into indexable documents on the write path, stored documents
//! back into payloads on the read path, and caller queries into engine
//! search requests. The indexer itself never interprets payloads.

use serde_json::Value;
use tantivy::query::{AllQuery, Query};
use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};
use tantivy::tokenizer::TokenizerManager;
use tantivy::TantivyDocument;

use kiroku_core::{Error, Result};

/// Name of the document identity field. Every codec schema must declare it
/// as a raw-tokenized stored text field; the ingest worker stamps it.
pub const ID_FIELD: &str = "_id";

/// Name of the JSON field the default codec stores payloads under.
pub const PAYLOAD_FIELD: &str = "body";

/// A single search hit before codec decoding.
///
/// `doc` is the stored document rendered field-by-field, with every field
/// mapped to the list of values it holds (for example
/// `{"_id": ["a1"], "body": [{...}]}`).
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    pub doc: Value,
}

/// A facet aggregation requested alongside a query.
#[derive(Debug, Clone)]
pub struct FacetRequest {
    /// Facet field name in the schema.
    pub field: String,
    /// Root path to count under, e.g. `/severity`.
    pub path: String,
}

/// Aggregated facet counts for one request, merged across shards.
#[derive(Debug, Clone)]
pub struct FacetResult {
    pub field: String,
    pub path: String,
    /// Facet path to count, e.g. `("/severity/error", 12)`.
    pub counts: Vec<(String, u64)>,
}

/// An engine search request produced by [`Codec::build_query`].
pub struct SearchRequest {
    pub query: Box<dyn Query>,
    pub offset: usize,
    pub limit: usize,
    pub facets: Vec<FacetRequest>,
}

/// One element of a result stream: a decoded hit, or a decoded facet value
/// when the codec implements [`FacetParser`]. Facets always follow hits.
#[derive(Debug, Clone)]
pub enum SearchItem {
    Hit(Value),
    Facet(Value),
}

/// Translator between opaque payloads/queries and engine documents/requests.
pub trait Codec: Send + Sync {
    /// Document schema for shards created under this codec. Must include
    /// [`ID_FIELD`] as a raw-tokenized stored text field.
    fn schema(&self) -> Schema;

    /// Convert a payload into an indexable document. The identity field is
    /// left unset; the ingest worker stamps it.
    fn marshal(&self, payload: &Value) -> Result<TantivyDocument>;

    /// Convert a stored hit back into a caller payload.
    fn unmarshal(&self, hit: &Hit) -> Result<Value>;

    /// Translate a caller query into an engine search request.
    fn build_query(&self, query: &Value, offset: usize, limit: usize) -> Result<SearchRequest>;

    /// Stable document identifier carried by the payload, if any. Payloads
    /// without one get a generated identifier at ingest time.
    fn doc_id(&self, payload: &Value) -> Option<String> {
        let _ = payload;
        None
    }

    /// Facet decoding capability, when the codec supports it.
    fn facet_parser(&self) -> Option<&dyn FacetParser> {
        None
    }
}

/// Optional codec capability for decoding facet aggregations.
pub trait FacetParser {
    /// Decode one merged facet result into zero or more stream values.
    fn unmarshal_facet(&self, facet: &FacetResult, out: &mut Vec<Value>);
}

/// Default codec for schemaless JSON payloads.
///
/// Stores the whole payload object under a single JSON field and parses
/// query strings with the engine's query syntax against it, so field paths
/// inside the payload are addressable (`level:error`, `msg:"disk full"`).
/// A payload may pin its identity by carrying an `_id` string member.
pub struct JsonCodec {
    schema: Schema,
    payload_field: Field,
}

impl JsonCodec {
    pub fn new() -> Self {
        let mut builder = Schema::builder();
        builder.add_text_field(ID_FIELD, STRING | STORED);
        let payload_field = builder.add_json_field(PAYLOAD_FIELD, STORED | TEXT);
        Self {
            schema: builder.build(),
            payload_field,
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for JsonCodec {
    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    fn marshal(&self, payload: &Value) -> Result<TantivyDocument> {
        if !payload.is_object() {
            return Err(Error::codec("payload must be a JSON object"));
        }
        let mut wrapped = serde_json::Map::new();
        wrapped.insert(PAYLOAD_FIELD.to_string(), payload.clone());
        TantivyDocument::parse_json(&self.schema, &Value::Object(wrapped).to_string())
            .map_err(|e| Error::codec(format!("cannot build document from payload: {e}")))
    }

    fn unmarshal(&self, hit: &Hit) -> Result<Value> {
        hit.doc
            .get(PAYLOAD_FIELD)
            .and_then(|values| values.get(0))
            .cloned()
            .ok_or_else(|| Error::codec("hit has no stored payload"))
    }

    fn build_query(&self, query: &Value, offset: usize, limit: usize) -> Result<SearchRequest> {
        let query: Box<dyn Query> = match query {
            Value::Null => Box::new(AllQuery),
            Value::String(text) if text.trim().is_empty() => Box::new(AllQuery),
            Value::String(text) => {
                let parser = tantivy::query::QueryParser::new(
                    self.schema.clone(),
                    vec![self.payload_field],
                    TokenizerManager::default(),
                );
                parser
                    .parse_query(text)
                    .map_err(|e| Error::codec(format!("cannot parse query {text:?}: {e}")))?
            }
            other => {
                return Err(Error::codec(format!(
                    "unsupported query shape: {other}"
                )))
            }
        };
        Ok(SearchRequest {
            query,
            offset,
            limit,
            facets: Vec::new(),
        })
    }

    fn doc_id(&self, payload: &Value) -> Option<String> {
        payload
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_carries_identity_field() {
        let codec = JsonCodec::new();
        assert!(codec.schema().get_field(ID_FIELD).is_ok());
        assert!(codec.schema().get_field(PAYLOAD_FIELD).is_ok());
    }

    #[test]
    fn marshal_rejects_non_objects() {
        let codec = JsonCodec::new();
        assert!(codec.marshal(&json!("bare string")).is_err());
        assert!(codec.marshal(&json!({"level": "info"})).is_ok());
    }

    #[test]
    fn doc_id_comes_from_payload() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec.doc_id(&json!({"_id": "a1", "level": "info"})),
            Some("a1".to_string())
        );
        assert_eq!(codec.doc_id(&json!({"level": "info"})), None);
        assert_eq!(codec.doc_id(&json!({"_id": 42})), None);
    }

    #[test]
    fn empty_and_null_queries_match_all() {
        let codec = JsonCodec::new();
        assert!(codec.build_query(&Value::Null, 0, 10).is_ok());
        assert!(codec.build_query(&json!(""), 0, 10).is_ok());
        assert!(codec.build_query(&json!("level:info"), 0, 10).is_ok());
        assert!(codec.build_query(&json!(42), 0, 10).is_err());
    }

    #[test]
    fn unmarshal_reads_stored_payload() {
        let codec = JsonCodec::new();
        let hit = Hit {
            id: "a1".to_string(),
            score: 1.0,
            doc: json!({"_id": ["a1"], "body": [{"level": "info"}]}),
        };
        assert_eq!(codec.unmarshal(&hit).unwrap(), json!({"level": "info"}));

        let empty = Hit {
            id: "a2".to_string(),
            score: 1.0,
            doc: json!({"_id": ["a2"]}),
        };
        assert!(codec.unmarshal(&empty).is_err());
    }
}
