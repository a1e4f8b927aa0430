use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tantivy::collector::{Count, TopDocs};
use tantivy::fastfield::FastValue;
use tantivy::query::{AllQuery, Query, QueryParser};
use tantivy::{DocAddress, Order, Searcher, TantivyDocument};

use crate::model::types::CatalogDocument;
use crate::search::tantivy::TantivyIndex;

/// Collection label prefix given to items without authored collection.
pub const UNCLASSIFIED_PREFIX: &str = "No Collection (";

/// Mandatory phrase clause `+field:"value"` with `"` and `\` escaped, so the
/// value survives the query parser verbatim.
pub fn build_search_term(field: &str, value: &str) -> String {
    let mut out = String::with_capacity(field.len() + value.len() + 5);
    out.push('+');
    out.push_str(&field.to_lowercase());
    out.push_str(":\"");
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A browse link: one field/value pair shown on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchTerm {
    pub field: String,
    pub label: String,
}

impl SearchTerm {
    pub fn new(field: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            label: label.into(),
        }
    }

    pub fn query(&self) -> String {
        build_search_term(&self.field, &self.label)
    }

    /// Relative listing URL carrying the query in `q`.
    pub fn href(&self) -> String {
        format!("/?q={}", urlencoding::encode(&self.query()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Relevance,
    CreatedAt,
    Id,
    Title,
    Rating,
    UpdatedAt,
    Collection,
    Marks,
    Pages,
}

impl SortKey {
    const ORDERABLE: [SortKey; 8] = [
        SortKey::CreatedAt,
        SortKey::Id,
        SortKey::Title,
        SortKey::Rating,
        SortKey::UpdatedAt,
        SortKey::Collection,
        SortKey::Marks,
        SortKey::Pages,
    ];

    pub fn field_name(self) -> &'static str {
        match self {
            SortKey::Relevance => "_score",
            SortKey::CreatedAt => "created_at",
            SortKey::Id => "id",
            SortKey::Title => "title",
            SortKey::Rating => "rating",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Collection => "collection",
            SortKey::Marks => "marks",
            SortKey::Pages => "pages",
        }
    }

    fn label(self) -> &'static str {
        match self {
            SortKey::Relevance => "Relevance",
            SortKey::CreatedAt => "Created",
            SortKey::Id => "Id",
            SortKey::Title => "Title",
            SortKey::Rating => "Rating",
            SortKey::UpdatedAt => "Updated",
            SortKey::Collection => "Collection",
            SortKey::Marks => "Marks",
            SortKey::Pages => "Pages",
        }
    }
}

/// Result ordering; `-field` means descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortField {
    pub key: SortKey,
    pub descending: bool,
}

impl SortField {
    /// Parse `field` / `-field`. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if name.is_empty() {
            return None;
        }
        if name == SortKey::Relevance.field_name() {
            return Some(Self::default());
        }
        SortKey::ORDERABLE
            .into_iter()
            .find(|k| k.field_name() == name)
            .map(|key| Self { key, descending })
    }

    /// Like [`Self::parse`], falling back to relevance.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_default()
    }

    /// Every orderable field in both directions.
    pub fn all() -> Vec<Self> {
        SortKey::ORDERABLE
            .into_iter()
            .flat_map(|key| {
                [
                    Self {
                        key,
                        descending: false,
                    },
                    Self {
                        key,
                        descending: true,
                    },
                ]
            })
            .collect()
    }

    pub fn label(&self) -> String {
        match (self.key, self.descending) {
            (SortKey::Relevance, _) => SortKey::Relevance.label().to_string(),
            (key, false) => format!("{} Asc", key.label()),
            (key, true) => format!("{} Desc", key.label()),
        }
    }

    fn order(&self) -> Order {
        if self.descending {
            Order::Desc
        } else {
            Order::Asc
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.key.field_name())
        } else {
            f.write_str(self.key.field_name())
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query-string; blank matches everything.
    pub query: String,
    pub limit: usize,
    pub offset: usize,
    pub sort: SortField,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 48,
            offset: 0,
            sort: SortField::default(),
        }
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.limit = page_size;
        self.offset = page.saturating_mul(page_size);
        self
    }

    pub fn sorted_by(mut self, sort: SortField) -> Self {
        self.sort = sort;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub total: usize,
    pub hits: Vec<CatalogDocument>,
}

fn sorted_addresses<T: FastValue>(
    searcher: &Searcher,
    query: &dyn Query,
    field: &str,
    order: Order,
    limit: usize,
    offset: usize,
) -> Result<Vec<DocAddress>> {
    let collector = TopDocs::with_limit(limit)
        .and_offset(offset)
        .order_by_fast_field::<T>(field, order);
    Ok(searcher
        .search(query, &collector)?
        .into_iter()
        .map(|(_, addr)| addr)
        .collect())
}

fn string_sorted_addresses(
    searcher: &Searcher,
    query: &dyn Query,
    field: &str,
    order: Order,
    limit: usize,
    offset: usize,
) -> Result<Vec<DocAddress>> {
    let collector = TopDocs::with_limit(limit)
        .and_offset(offset)
        .order_by_string_fast_field(field, order);
    Ok(searcher
        .search(query, &collector)?
        .into_iter()
        .map(|(_, addr)| addr)
        .collect())
}

impl TantivyIndex {
    pub fn parse_query(&self, query: &str) -> Result<Box<dyn Query>> {
        if query.trim().is_empty() {
            return Ok(Box::new(AllQuery));
        }
        let f = &self.fields;
        let parser = QueryParser::for_index(
            &self.index,
            vec![
                f.title,
                f.tags,
                f.artist,
                f.collection,
                f.description,
                f.parody,
                f.magazine,
                f.publisher,
                f.language,
                f.kind,
            ],
        );
        Ok(parser.parse_query(query.trim())?)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let query = self.parse_query(&request.query)?;
        let searcher = self.reader.searcher();
        tracing::debug!(
            query = %request.query,
            sort = %request.sort,
            limit = request.limit,
            offset = request.offset,
            "search_start"
        );

        let total = searcher.search(&*query, &Count)?;
        if request.limit == 0 {
            return Ok(SearchResults {
                total,
                hits: Vec::new(),
            });
        }

        let (limit, offset, order) = (request.limit, request.offset, request.sort.order());
        let q = &*query;
        let addresses = match request.sort.key {
            SortKey::Relevance => searcher
                .search(q, &TopDocs::with_limit(limit).and_offset(offset))?
                .into_iter()
                .map(|(_, addr)| addr)
                .collect(),
            SortKey::Rating => sorted_addresses::<i64>(&searcher, q, "rating", order, limit, offset)?,
            SortKey::Marks => sorted_addresses::<i64>(&searcher, q, "marks", order, limit, offset)?,
            SortKey::Pages => sorted_addresses::<u64>(&searcher, q, "pages", order, limit, offset)?,
            SortKey::CreatedAt => {
                sorted_addresses::<tantivy::DateTime>(&searcher, q, "created_at", order, limit, offset)?
            }
            SortKey::UpdatedAt => {
                sorted_addresses::<tantivy::DateTime>(&searcher, q, "updated_at", order, limit, offset)?
            }
            SortKey::Id => string_sorted_addresses(&searcher, q, "_id", order, limit, offset)?,
            SortKey::Title => {
                string_sorted_addresses(&searcher, q, "_title_sort", order, limit, offset)?
            }
            SortKey::Collection => {
                string_sorted_addresses(&searcher, q, "_collection_sort", order, limit, offset)?
            }
        };

        let mut hits = Vec::with_capacity(addresses.len());
        for addr in addresses {
            let doc: TantivyDocument = searcher.doc(addr)?;
            hits.push(self.from_document(&doc));
        }
        Ok(SearchResults { total, hits })
    }

    /// Items still carrying an auto-generated collection label, as `id -> title`.
    pub fn pending(&self) -> Result<BTreeMap<String, String>> {
        let query = self.parse_query(&build_search_term("collection", "No Collection"))?;
        let searcher = self.reader.searcher();
        let limit = (searcher.num_docs() as usize).max(1);
        let top = searcher.search(&*query, &TopDocs::with_limit(limit))?;
        let mut out = BTreeMap::new();
        for (_, addr) in top {
            let doc = self.from_document(&searcher.doc::<TantivyDocument>(addr)?);
            if doc.collection.starts_with(UNCLASSIFIED_PREFIX) {
                out.insert(doc.id, doc.title);
            }
        }
        Ok(out)
    }
}
