use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::{debug, warn};

use crate::model::types::CatalogDocument;

pub const SCHEMA_VERSION: &str = "v1";

/// Unicode word splitting plus lowercasing; every analyzed field uses it.
pub const SIMPLE_TOKENIZER: &str = "simple_lowercase";

const DEFAULT_WRITER_HEAP_BYTES: usize = 50_000_000;

/// Index write protocol. Documents are keyed by their `id` (the pointer hash).
pub trait CatalogIndex: Send + Sync {
    /// Replace or insert one document and make it visible.
    fn upsert(&self, doc: &CatalogDocument) -> Result<()>;

    /// Replace or insert all of `docs`; fails (and keeps nothing) as a unit.
    fn commit_batch(&self, docs: &[CatalogDocument]) -> Result<()>;
}

#[derive(Clone, Copy)]
pub struct Fields {
    pub id: Field,
    pub key: Field,
    pub path_key: Field,
    pub source_id: Field,
    pub title: Field,
    pub tags: Field,
    pub artist: Field,
    pub collection: Field,
    pub cover: Field,
    pub description: Field,
    pub language: Field,
    pub magazine: Field,
    pub parody: Field,
    pub publisher: Field,
    pub kind: Field,
    pub rating: Field,
    pub marks: Field,
    pub pages: Field,
    pub thumbnail: Field,
    pub created_at: Field,
    pub updated_at: Field,
    pub exact_id: Field,
    pub title_sort: Field,
    pub collection_sort: Field,
}

pub struct TantivyIndex {
    pub index: Index,
    writer: Mutex<IndexWriter>,
    pub(crate) reader: IndexReader,
    pub fields: Fields,
}

impl TantivyIndex {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Self::open_or_create_with_heap(path, DEFAULT_WRITER_HEAP_BYTES)
    }

    /// Open the index at `path`, creating it with [`build_schema`] when absent.
    /// An existing index keeps the schema it was created with.
    pub fn open_or_create_with_heap(path: &Path, heap_bytes: usize) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating index dir {}", path.display()))?;
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path).with_context(|| format!("opening index {}", path.display()))?
        } else {
            Index::create_in_dir(path, build_schema())
                .with_context(|| format!("creating index {}", path.display()))?
        };
        register_tokenizers(&index);

        let fields = fields_from_schema(&index.schema())?;
        let writer: IndexWriter = index
            .writer(heap_bytes)
            .with_context(|| "create index writer")?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .with_context(|| "create index reader")?;

        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
        })
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn to_document(&self, d: &CatalogDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, &d.id);
        doc.add_text(f.exact_id, &d.id);
        doc.add_text(f.key, &d.key);
        doc.add_text(f.path_key, &d.path_key);
        doc.add_i64(f.source_id, d.source_id);
        doc.add_text(f.title, &d.title);
        doc.add_text(f.title_sort, d.title.to_lowercase());
        for tag in &d.tags {
            doc.add_text(f.tags, tag);
        }
        doc.add_text(f.artist, &d.artist);
        doc.add_text(f.collection, &d.collection);
        doc.add_text(f.collection_sort, d.collection.to_lowercase());
        doc.add_text(f.cover, &d.cover);
        doc.add_text(f.description, &d.description);
        doc.add_text(f.language, &d.language);
        doc.add_text(f.magazine, &d.magazine);
        doc.add_text(f.parody, &d.parody);
        doc.add_text(f.publisher, &d.publisher);
        doc.add_text(f.kind, &d.kind);
        doc.add_i64(f.rating, d.rating);
        doc.add_i64(f.marks, d.marks);
        doc.add_u64(f.pages, d.pages);
        doc.add_u64(f.thumbnail, d.thumbnail);
        if let Some(ts) = d.created_at {
            doc.add_date(f.created_at, to_tantivy_date(ts));
        }
        if let Some(ts) = d.updated_at {
            doc.add_date(f.updated_at, to_tantivy_date(ts));
        }
        doc
    }

    /// Inverse of [`Self::to_document`] over the stored fields.
    pub fn from_document(&self, doc: &TantivyDocument) -> CatalogDocument {
        let f = &self.fields;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let date = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_datetime())
                .and_then(|d| DateTime::<Utc>::from_timestamp_millis(d.into_timestamp_millis()))
        };
        CatalogDocument {
            id: text(f.id),
            key: text(f.key),
            path_key: text(f.path_key),
            source_id: doc.get_first(f.source_id).and_then(|v| v.as_i64()).unwrap_or(0),
            collection: text(f.collection),
            title: text(f.title),
            kind: text(f.kind),
            tags: doc
                .get_all(f.tags)
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            language: text(f.language),
            artist: text(f.artist),
            created_at: date(f.created_at),
            parody: text(f.parody),
            magazine: text(f.magazine),
            publisher: text(f.publisher),
            description: text(f.description),
            pages: doc.get_first(f.pages).and_then(|v| v.as_u64()).unwrap_or(0),
            thumbnail: doc.get_first(f.thumbnail).and_then(|v| v.as_u64()).unwrap_or(0),
            cover: text(f.cover),
            updated_at: date(f.updated_at),
            rating: doc.get_first(f.rating).and_then(|v| v.as_i64()).unwrap_or(0),
            marks: doc.get_first(f.marks).and_then(|v| v.as_i64()).unwrap_or(0),
        }
    }

    fn stage_and_commit(&self, writer: &mut IndexWriter, docs: &[CatalogDocument]) -> Result<()> {
        for d in docs {
            writer.delete_term(Term::from_field_text(self.fields.exact_id, &d.id));
            writer.add_document(self.to_document(d))?;
        }
        writer.commit()?;
        Ok(())
    }
}

impl CatalogIndex for TantivyIndex {
    fn upsert(&self, doc: &CatalogDocument) -> Result<()> {
        self.commit_batch(std::slice::from_ref(doc))
    }

    fn commit_batch(&self, docs: &[CatalogDocument]) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Err(e) = self.stage_and_commit(&mut writer, docs) {
            if let Err(rb) = writer.rollback() {
                warn!(error = %rb, "index rollback failed");
            }
            return Err(e);
        }
        drop(writer);
        self.reader.reload().with_context(|| "reload index reader")?;
        debug!(docs = docs.len(), "index batch committed");
        Ok(())
    }
}

fn to_tantivy_date(ts: DateTime<Utc>) -> tantivy::DateTime {
    tantivy::DateTime::from_timestamp_millis(ts.timestamp_millis())
}

fn analyzed_text() -> TextOptions {
    let indexing = TextFieldIndexing::default()
        .set_tokenizer(SIMPLE_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    TextOptions::default()
        .set_indexing_options(indexing)
        .set_stored()
}

pub fn register_tokenizers(index: &Index) {
    index.tokenizers().register(
        SIMPLE_TOKENIZER,
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .build(),
    );
}

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    for name in [
        "id",
        "title",
        "tags",
        "artist",
        "collection",
        "cover",
        "description",
        "language",
        "magazine",
        "parody",
        "publisher",
        "type",
    ] {
        schema_builder.add_text_field(name, analyzed_text());
    }
    schema_builder.add_text_field("key", STORED);
    schema_builder.add_text_field("path_key", STORED);
    schema_builder.add_i64_field("source_id", INDEXED | STORED);
    schema_builder.add_i64_field("rating", INDEXED | STORED | FAST);
    schema_builder.add_i64_field("marks", INDEXED | STORED | FAST);
    schema_builder.add_u64_field("pages", INDEXED | STORED | FAST);
    schema_builder.add_u64_field("thumbnail", STORED);
    schema_builder.add_date_field("created_at", INDEXED | STORED | FAST);
    schema_builder.add_date_field("updated_at", INDEXED | STORED | FAST);
    // Raw keyword copies: exact id for upserts, lowercased titles for ordering.
    schema_builder.add_text_field("_id", STRING | FAST);
    schema_builder.add_text_field("_title_sort", STRING | FAST);
    schema_builder.add_text_field("_collection_sort", STRING | FAST);
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> Result<Fields> {
    let get = |name: &str| {
        schema
            .get_field(name)
            .map_err(|_| anyhow!("schema missing {name}"))
    };
    Ok(Fields {
        id: get("id")?,
        key: get("key")?,
        path_key: get("path_key")?,
        source_id: get("source_id")?,
        title: get("title")?,
        tags: get("tags")?,
        artist: get("artist")?,
        collection: get("collection")?,
        cover: get("cover")?,
        description: get("description")?,
        language: get("language")?,
        magazine: get("magazine")?,
        parody: get("parody")?,
        publisher: get("publisher")?,
        kind: get("type")?,
        rating: get("rating")?,
        marks: get("marks")?,
        pages: get("pages")?,
        thumbnail: get("thumbnail")?,
        created_at: get("created_at")?,
        updated_at: get("updated_at")?,
        exact_id: get("_id")?,
        title_sort: get("_title_sort")?,
        collection_sort: get("_collection_sort")?,
    })
}
