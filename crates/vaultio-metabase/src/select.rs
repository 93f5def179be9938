//! Container-scoped search.

use crate::db::Metabase;
use crate::tables::{self, ATTR, HEADER_TABLES, PARENT, ROOT};
use redb::{ReadTransaction, ReadableTable};
use std::collections::BTreeSet;
use vaultio_core::{Address, ContainerId, ObjectHeader, ObjectId, Result};

/// Attribute match operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    /// Attribute present with exactly this value.
    Eq,
    /// Attribute present with a different value.
    Ne,
    /// Attribute present and its value starts with the operand.
    CommonPrefix,
    /// Attribute absent.
    NotPresent,
}

/// One attribute filter.
#[derive(Clone, Debug)]
pub struct AttrFilter {
    pub key: String,
    pub op: MatchOp,
    pub value: String,
}

/// Filter set of a select query. All filters must match.
#[derive(Clone, Debug, Default)]
pub struct SelectFilters {
    object_id: Option<ObjectId>,
    root: bool,
    phy: bool,
    attrs: Vec<AttrFilter>,
}

impl SelectFilters {
    /// Empty filter set matching every object of the container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one object id.
    #[must_use]
    pub fn with_object_id(mut self, id: ObjectId) -> Self {
        self.object_id = Some(id);
        self
    }

    /// Restrict to top-level user objects.
    #[must_use]
    pub fn with_root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Restrict to physically stored objects.
    #[must_use]
    pub fn with_phy(mut self) -> Self {
        self.phy = true;
        self
    }

    /// Add an attribute filter.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        self.attrs.push(AttrFilter {
            key: key.into(),
            op,
            value: value.into(),
        });
        self
    }
}

impl Metabase {
    /// Addresses of the container's objects matching every filter.
    ///
    /// Equality filters use the attribute index; `NE`, `COMMON_PREFIX` and
    /// `NOT_PRESENT` inspect candidate headers. Inhumed addresses never
    /// match.
    pub fn select(&self, container: &ContainerId, filters: &SelectFilters) -> Result<Vec<Address>> {
        let rtx = self.db.begin_read()?;

        let mut candidates = self.seed_candidates(&rtx, container, filters)?;

        // cheap set-level restrictions
        if let Some(id) = filters.object_id {
            candidates.retain(|c| *c == id);
        }
        if filters.root {
            let root = rtx.open_table(ROOT)?;
            let mut kept = BTreeSet::new();
            for id in candidates {
                if root
                    .get(tables::cid_oid_key(container, &id).as_slice())?
                    .is_some()
                {
                    kept.insert(id);
                }
            }
            candidates = kept;
        }
        if filters.phy {
            let mut kept = BTreeSet::new();
            for id in candidates {
                let addr = Address::new(*container, id);
                if Self::phy_header(&rtx, &addr)?.is_some() {
                    kept.insert(id);
                }
            }
            candidates = kept;
        }

        let mut out = Vec::new();
        'candidate: for id in candidates {
            let addr = Address::new(*container, id);

            if Self::graveyard_record(&rtx, &addr)?.is_some() {
                continue;
            }

            let Some(header) = load_any_header(&rtx, &addr)? else {
                continue;
            };

            for filter in &filters.attrs {
                if !attr_matches(&header, filter) {
                    continue 'candidate;
                }
            }

            out.push(addr);
        }

        Ok(out)
    }

    /// Initial candidate set, using the cheapest available index.
    fn seed_candidates(
        &self,
        rtx: &ReadTransaction,
        container: &ContainerId,
        filters: &SelectFilters,
    ) -> Result<BTreeSet<ObjectId>> {
        if let Some(id) = filters.object_id {
            return Ok(BTreeSet::from([id]));
        }

        // first equality filter drives an attribute-index scan
        if let Some(eq) = filters.attrs.iter().find(|f| f.op == MatchOp::Eq) {
            let prefix = tables::attr_value_prefix(container, &eq.key, &eq.value)?;
            let attr = rtx.open_table(ATTR)?;
            let mut out = BTreeSet::new();
            scan_prefix(&attr, &prefix, |key| {
                out.insert(tables::parse_attr_key(key)?.object);
                Ok(())
            })?;
            return Ok(out);
        }

        if filters.root {
            let root = rtx.open_table(ROOT)?;
            let mut out = BTreeSet::new();
            scan_prefix(&root, container.as_bytes(), |key| {
                out.insert(tables::parse_addr_key(key)?.object);
                Ok(())
            })?;
            return Ok(out);
        }

        // everything known in the container: phy headers plus virtual parents
        let mut out = BTreeSet::new();
        for def in HEADER_TABLES {
            let table = rtx.open_table(def)?;
            scan_prefix(&table, container.as_bytes(), |key| {
                out.insert(tables::parse_addr_key(key)?.object);
                Ok(())
            })?;
        }
        if !filters.phy {
            let parent = rtx.open_table(PARENT)?;
            scan_prefix(&parent, container.as_bytes(), |key| {
                out.insert(tables::parse_addr_key(key)?.object);
                Ok(())
            })?;
        }
        Ok(out)
    }
}

/// Header of a physically stored or virtual object.
fn load_any_header(rtx: &ReadTransaction, addr: &Address) -> Result<Option<ObjectHeader>> {
    if let Some(header) = Metabase::phy_header(rtx, addr)? {
        return Ok(Some(header));
    }

    let children = Metabase::child_list(rtx, addr)?;
    let Some(last) = children.last() else {
        return Ok(None);
    };
    let child_addr = Address::new(addr.container, *last);
    Ok(Metabase::phy_header(rtx, &child_addr)?
        .and_then(|child| child.parent().cloned()))
}

fn attr_matches(header: &ObjectHeader, filter: &AttrFilter) -> bool {
    let value = header.attribute(&filter.key);
    match filter.op {
        MatchOp::Eq => value == Some(filter.value.as_str()),
        MatchOp::Ne => value.is_some_and(|v| v != filter.value),
        MatchOp::CommonPrefix => value.is_some_and(|v| v.starts_with(filter.value.as_str())),
        MatchOp::NotPresent => value.is_none(),
    }
}

/// Visit every key starting with `prefix`.
fn scan_prefix<T, F>(table: &T, prefix: &[u8], mut f: F) -> Result<()>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
    F: FnMut(&[u8]) -> Result<()>,
{
    let end = tables::prefix_end(prefix);
    let range = match &end {
        Some(end) => table.range(prefix..end.as_slice())?,
        None => table.range(prefix..)?,
    };
    for entry in range {
        let (key, _) = entry?;
        f(key.value())?;
    }
    Ok(())
}
