//! JSON-file-backed page store.
//!
//! Pages live in memory behind a single `RwLock`; every mutation rewrites
//! the store file via temp-file + rename so a crash never leaves a partial
//! file. The full-text index is derived state and is rebuilt on load.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fts::FullTextIndex;
use super::{NewPage, Page, PageStore, PageUpdate, StoreError, VisitCounters};

#[derive(Serialize, Deserialize)]
struct StoreFile {
    next_id: u64,
    pages: Vec<Page>,
}

struct StoreInner {
    next_id: u64,
    pages: BTreeMap<u64, Page>,
    by_url: HashMap<String, u64>,
    fts: FullTextIndex,
}

pub struct LocalPageStore {
    path: PathBuf,
    inner: RwLock<StoreInner>,
}

impl LocalPageStore {
    /// Load the store from `path`, starting empty when the file is missing.
    /// A corrupt file is a hard error; writers must not clobber it silently.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut inner = StoreInner {
            next_id: 1,
            pages: BTreeMap::new(),
            by_url: HashMap::new(),
            fts: FullTextIndex::new(),
        };

        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let file: StoreFile =
                serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            inner.next_id = file.next_id;
            for page in file.pages {
                inner.by_url.insert(page.url.clone(), page.id);
                inner.fts.index_page(
                    page.id,
                    &page.title,
                    &page.description,
                    &page.keywords,
                    &page.content,
                );
                inner.pages.insert(page.id, page);
            }
            log::info!("loaded {} pages from {}", inner.pages.len(), path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(inner),
        })
    }

    fn persist(&self, inner: &StoreInner) -> Result<(), StoreError> {
        let file = StoreFile {
            next_id: inner.next_id,
            pages: inner.pages.values().cloned().collect(),
        };
        let raw = serde_json::to_string(&file).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn insert_locked(inner: &mut StoreInner, page: NewPage, at: DateTime<Utc>) -> u64 {
        let id = inner.next_id;
        inner.next_id += 1;

        let row = Page {
            id,
            url: page.url.clone(),
            title: page.title,
            description: String::new(),
            keywords: String::new(),
            content: page.content,
            favicon_url: page.favicon_url,
            embedding: None,
            visit_count: 0,
            first_visited: None,
            last_visited: None,
            indexed_at: at,
            last_updated_at: at,
            access_frequency: 0.0,
            recency_score: 0.0,
            arc_score: 0.0,
        };

        inner
            .fts
            .index_page(id, &row.title, &row.description, &row.keywords, &row.content);
        inner.by_url.insert(page.url, id);
        inner.pages.insert(id, row);
        id
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl PageStore for LocalPageStore {
    fn insert(&self, page: NewPage, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;
        let id = Self::insert_locked(inner, page, at);
        self.persist(inner)?;
        Ok(id)
    }

    fn update_by_id(&self, id: u64, update: PageUpdate) -> Result<(), StoreError> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;
        let page = inner.pages.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let mut text_changed = false;
        if let Some(title) = update.title {
            page.title = title;
            text_changed = true;
        }
        if let Some(description) = update.description {
            page.description = description;
            text_changed = true;
        }
        if let Some(keywords) = update.keywords {
            page.keywords = keywords;
            text_changed = true;
        }
        if let Some(content) = update.content {
            page.content = content;
            text_changed = true;
        }
        if let Some(favicon_url) = update.favicon_url {
            page.favicon_url = favicon_url;
        }
        if let Some(embedding) = update.embedding {
            page.embedding = Some(embedding);
        }
        if let Some(v) = update.access_frequency {
            page.access_frequency = v;
        }
        if let Some(v) = update.recency_score {
            page.recency_score = v;
        }
        if let Some(v) = update.arc_score {
            page.arc_score = v;
        }

        if text_changed {
            inner.fts.index_page(
                id,
                &page.title,
                &page.description,
                &page.keywords,
                &page.content,
            );
        }

        self.persist(inner)?;
        Ok(())
    }

    fn upsert_by_url(&self, page: NewPage, at: DateTime<Utc>) -> Result<(u64, bool), StoreError> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;

        if let Some(&id) = inner.by_url.get(&page.url) {
            let row = inner.pages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            row.title = page.title;
            row.content = page.content;
            if page.favicon_url.is_some() {
                row.favicon_url = page.favicon_url;
            }
            row.last_updated_at = at;

            inner.fts.index_page(
                id,
                &row.title,
                &row.description,
                &row.keywords,
                &row.content,
            );
            self.persist(inner)?;
            return Ok((id, false));
        }

        let id = Self::insert_locked(inner, page, at);
        self.persist(inner)?;
        Ok((id, true))
    }

    fn get_by_id(&self, id: u64) -> Result<Option<Page>, StoreError> {
        Ok(self.read_guard().pages.get(&id).cloned())
    }

    fn get_by_url(&self, url: &str) -> Result<Option<Page>, StoreError> {
        let inner = self.read_guard();
        Ok(inner
            .by_url
            .get(url)
            .and_then(|id| inner.pages.get(id))
            .cloned())
    }

    fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;
        let Some(page) = inner.pages.remove(&id) else {
            return Ok(false);
        };
        inner.by_url.remove(&page.url);
        inner.fts.remove(id);
        self.persist(inner)?;
        Ok(true)
    }

    fn list(&self, offset: usize, limit: usize) -> Result<Vec<Page>, StoreError> {
        let inner = self.read_guard();
        Ok(inner
            .pages
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read_guard().pages.len())
    }

    fn full_text_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(u64, usize)>, StoreError> {
        Ok(self.read_guard().fts.search(query, limit))
    }

    fn bump_visit(&self, id: u64, at: DateTime<Utc>) -> Result<VisitCounters, StoreError> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;
        let page = inner.pages.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        page.visit_count += 1;
        let first = *page.first_visited.get_or_insert(at);
        page.last_visited = Some(at);

        let counters = VisitCounters {
            visit_count: page.visit_count,
            first_visited: first,
            last_visited: at,
        };

        self.persist(inner)?;
        Ok(counters)
    }

    fn halve_visit_counts(&self) -> Result<(), StoreError> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;
        for page in inner.pages.values_mut() {
            page.visit_count /= 2;
        }
        self.persist(inner)?;
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<Page>, StoreError> {
        Ok(self.read_guard().pages.values().cloned().collect())
    }
}
