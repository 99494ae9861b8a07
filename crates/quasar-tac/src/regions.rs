//! Exception-region index.
//!
//! Groups the raw exception table into try regions and answers the offset
//! queries the lifter needs: which regions/handlers begin at an offset, and
//! which region an operation sits in. Containment is resolved innermost
//! first so `leave`/`endfinally` semantics do not depend on the order blocks
//! come off the worklist.

use std::collections::HashMap;

use quasar_model::{ExceptionHandler, HandlerKind, TypeRef};

/// A catch-like handler (catch, filter, fault) of a try region.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchInfo {
    pub begin: u32,
    pub end: u32,
    pub kind: HandlerKind,
    /// Declared exception type; `None` for filters and faults.
    pub exception_type: Option<TypeRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinallyInfo {
    pub begin: u32,
    pub end: u32,
}

/// One protected region with all its handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct TryRegion {
    pub begin: u32,
    pub end: u32,
    pub catches: Vec<CatchInfo>,
    pub finally: Option<FinallyInfo>,
}

impl TryRegion {
    fn contains(&self, offset: u32) -> bool {
        self.begin <= offset && offset < self.end
    }

    fn extent(&self) -> u32 {
        self.end - self.begin
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    regions: Vec<TryRegion>,
    try_starts: HashMap<u32, Vec<usize>>,
    /// handler begin offset -> (region, handler index)
    handler_starts: HashMap<u32, (usize, usize)>,
    finally_starts: HashMap<u32, usize>,
}

impl RegionIndex {
    #[must_use]
    pub fn build(handlers: &[ExceptionHandler]) -> Self {
        let mut index = Self::default();

        for row in handlers {
            let region_idx = index.region_for(row.try_start, row.try_end);
            match row.kind {
                HandlerKind::Finally => {
                    index.regions[region_idx].finally = Some(FinallyInfo {
                        begin: row.handler_start,
                        end: row.handler_end,
                    });
                    index.finally_starts.insert(row.handler_start, region_idx);
                }
                HandlerKind::Catch | HandlerKind::Filter | HandlerKind::Fault => {
                    let handler_idx = index.regions[region_idx].catches.len();
                    index.regions[region_idx].catches.push(CatchInfo {
                        begin: row.handler_start,
                        end: row.handler_end,
                        kind: row.kind,
                        exception_type: row.exception_type.clone(),
                    });
                    index
                        .handler_starts
                        .insert(row.handler_start, (region_idx, handler_idx));
                }
            }
        }

        index
    }

    fn region_for(&mut self, begin: u32, end: u32) -> usize {
        if let Some(idx) = self
            .regions
            .iter()
            .position(|r| r.begin == begin && r.end == end)
        {
            return idx;
        }
        let idx = self.regions.len();
        self.regions.push(TryRegion {
            begin,
            end,
            catches: Vec::new(),
            finally: None,
        });
        self.try_starts.entry(begin).or_default().push(idx);
        idx
    }

    /// Regions whose protected range begins at `offset`, outermost first.
    pub fn trys_starting_at(&self, offset: u32) -> impl Iterator<Item = &TryRegion> + '_ {
        self.try_starts
            .get(&offset)
            .into_iter()
            .flatten()
            .map(|&idx| &self.regions[idx])
    }

    #[must_use]
    pub fn catch_starting_at(&self, offset: u32) -> Option<&CatchInfo> {
        let &(region, handler) = self.handler_starts.get(&offset)?;
        Some(&self.regions[region].catches[handler])
    }

    #[must_use]
    pub fn finally_starting_at(&self, offset: u32) -> Option<FinallyInfo> {
        let &region = self.finally_starts.get(&offset)?;
        self.regions[region].finally
    }

    /// The innermost try region whose protected range contains `offset`.
    #[must_use]
    pub fn innermost_try_containing(&self, offset: u32) -> Option<&TryRegion> {
        self.regions
            .iter()
            .filter(|r| r.contains(offset))
            .min_by_key(|r| r.extent())
    }

    /// The finally handler whose body contains `offset`, if any.
    #[must_use]
    pub fn finally_containing(&self, offset: u32) -> Option<FinallyInfo> {
        self.regions
            .iter()
            .filter_map(|r| r.finally)
            .filter(|fin| fin.begin <= offset && offset < fin.end)
            .min_by_key(|fin| fin.end - fin.begin)
    }

    /// Whether `offset` sits inside a catch-like handler body.
    #[must_use]
    pub fn in_catch_handler(&self, offset: u32) -> bool {
        self.regions
            .iter()
            .flat_map(|r| &r.catches)
            .any(|c| c.begin <= offset && offset < c.end)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
