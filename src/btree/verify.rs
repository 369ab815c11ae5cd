//! End-to-end index invariant checking.
//!
//! Walks the tree verifying key order inside every node, separator bounds
//! across levels, uniform leaf depth, the left-to-right leaf chain, and that
//! no page sits both on the free list and in the tree.

use std::collections::HashSet;

use itertools::Itertools;

use crate::btree::file::BTreeIndexFile;
use crate::btree::header_page;
use crate::btree::inner_page::InnerPage;
use crate::btree::key::IndexKey;
use crate::btree::leaf_page::LeafPage;
use crate::btree::{BTREE_EMPTY_PAGE, BTREE_INNER_PAGE, BTREE_LEAF_PAGE, NO_PAGE};
use crate::engine::Exec;
use crate::error::{StorageError, StorageResult};
use crate::util::HandyRwLock;

/// What a successful verification saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Levels from root to leaves; 1 for a root-only leaf, 0 for an empty
    /// tree.
    pub height: usize,
    pub num_entries: usize,
    pub num_leaves: usize,
}

struct Walk<'i> {
    index: &'i BTreeIndexFile,
    reachable: HashSet<u16>,
    leaves_in_order: Vec<u16>,
    leaf_depth: Option<usize>,
    num_entries: usize,
}

impl<'i> Walk<'i> {
    fn corrupt(&self, detail: String) -> StorageError {
        StorageError::corrupt_index(self.index.name(), detail)
    }

    fn check_node(
        &mut self,
        ctx: &mut Exec,
        page_no: u16,
        lower: Option<&IndexKey>,
        upper: Option<&IndexKey>,
        depth: usize,
    ) -> StorageResult<()> {
        if !self.reachable.insert(page_no) {
            return Err(self.corrupt(format!("page {} referenced twice", page_no)));
        }

        let pod = ctx.fetch(self.index.file(), page_no as u32, false)?;
        let page_type = pod.rl().read_u8(0);

        match page_type {
            BTREE_LEAF_PAGE => {
                let leaf = LeafPage::wrap(pod, self.index.key_columns())?;
                if let Some(expected) = self.leaf_depth {
                    if depth != expected {
                        return Err(self.corrupt(format!(
                            "leaf {} at depth {}, expected {}",
                            page_no, depth, expected
                        )));
                    }
                } else {
                    self.leaf_depth = Some(depth);
                }

                let keys: Vec<IndexKey> = (0..leaf.num_entries())
                    .map(|i| leaf.key_at(i))
                    .collect::<StorageResult<_>>()?;
                for (a, b) in keys.iter().tuple_windows() {
                    if a.compare(b) != std::cmp::Ordering::Less {
                        return Err(self.corrupt(format!(
                            "leaf {} keys out of order: {} !< {}",
                            page_no, a, b
                        )));
                    }
                }
                for key in &keys {
                    if let Some(lo) = lower {
                        if key.compare(lo) == std::cmp::Ordering::Less {
                            return Err(self.corrupt(format!(
                                "leaf {} key {} below separator {}",
                                page_no, key, lo
                            )));
                        }
                    }
                    if let Some(hi) = upper {
                        if key.compare(hi) != std::cmp::Ordering::Less {
                            return Err(self.corrupt(format!(
                                "leaf {} key {} not below separator {}",
                                page_no, key, hi
                            )));
                        }
                    }
                }

                self.num_entries += keys.len();
                self.leaves_in_order.push(page_no);
                ctx.unpin(leaf.page());
            }
            BTREE_INNER_PAGE => {
                let inner = InnerPage::wrap(pod, self.index.key_columns())?;
                let n_keys = inner.num_pointers() - 1;

                let keys: Vec<IndexKey> = (0..n_keys)
                    .map(|i| inner.key_at(i))
                    .collect::<StorageResult<_>>()?;
                for (a, b) in keys.iter().tuple_windows() {
                    if a.compare(b) != std::cmp::Ordering::Less {
                        return Err(self.corrupt(format!(
                            "inner {} separators out of order: {} !< {}",
                            page_no, a, b
                        )));
                    }
                }
                for key in &keys {
                    if let Some(lo) = lower {
                        if key.compare(lo) == std::cmp::Ordering::Less {
                            return Err(self.corrupt(format!(
                                "inner {} separator {} below bound {}",
                                page_no, key, lo
                            )));
                        }
                    }
                    if let Some(hi) = upper {
                        if key.compare(hi) != std::cmp::Ordering::Less {
                            return Err(self.corrupt(format!(
                                "inner {} separator {} not below bound {}",
                                page_no, key, hi
                            )));
                        }
                    }
                }

                let pointers = inner.pointers().to_vec();
                ctx.unpin(inner.page());
                for (i, &child) in pointers.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(&keys[i - 1]) };
                    let hi = if i == pointers.len() - 1 {
                        upper
                    } else {
                        Some(&keys[i])
                    };
                    self.check_node(ctx, child, lo, hi, depth + 1)?;
                }
            }
            other => {
                return Err(self.corrupt(format!(
                    "page {} has type byte {} inside the tree",
                    page_no, other
                )))
            }
        }
        Ok(())
    }
}

/// Check every structural invariant of the index; `IndexCorruption` names
/// the first violated property.
pub fn verify(index: &BTreeIndexFile, ctx: &mut Exec) -> StorageResult<IndexSummary> {
    let header = ctx.fetch(index.file(), 0, false)?;
    let (root, first_leaf, first_empty) = {
        let h = header.rl();
        (
            header_page::root_page_no(&h),
            header_page::first_leaf_page_no(&h),
            header_page::first_empty_page_no(&h),
        )
    };
    ctx.unpin(&header);

    let mut walk = Walk {
        index,
        reachable: HashSet::new(),
        leaves_in_order: Vec::new(),
        leaf_depth: None,
        num_entries: 0,
    };

    if root == NO_PAGE {
        if first_leaf != NO_PAGE {
            return Err(walk.corrupt(format!(
                "empty tree with first leaf {}",
                first_leaf
            )));
        }
    } else {
        walk.check_node(ctx, root, None, None, 0)?;

        // The leaf chain must visit exactly the in-order leaves.
        let mut chained = Vec::new();
        let mut cur = first_leaf;
        while cur != NO_PAGE {
            if chained.len() > walk.reachable.len() {
                return Err(walk.corrupt("leaf chain does not terminate".to_string()));
            }
            chained.push(cur);
            let pod = ctx.fetch(index.file(), cur as u32, false)?;
            let leaf = LeafPage::wrap(pod, index.key_columns())?;
            let next = leaf.next_leaf();
            ctx.unpin(leaf.page());
            cur = next;
        }
        if chained != walk.leaves_in_order {
            return Err(walk.corrupt(format!(
                "leaf chain {:?} disagrees with tree order {:?}",
                chained, walk.leaves_in_order
            )));
        }
    }

    // Free-list pages must be marked empty and disjoint from the tree.
    let page_count = ctx.fm.page_count(index.file())?;
    let mut free_seen = HashSet::new();
    let mut cur = first_empty;
    while cur != NO_PAGE {
        if walk.reachable.contains(&cur) {
            return Err(walk.corrupt(format!(
                "page {} is on the free list and in the tree",
                cur
            )));
        }
        if !free_seen.insert(cur) || free_seen.len() as u32 > page_count {
            return Err(walk.corrupt("free list cycles".to_string()));
        }
        let pod = ctx.fetch(index.file(), cur as u32, false)?;
        let (page_type, next) = {
            let p = pod.rl();
            (p.read_u8(0), p.read_u16(1))
        };
        ctx.unpin(&pod);
        if page_type != BTREE_EMPTY_PAGE {
            return Err(walk.corrupt(format!(
                "free-list page {} has type byte {}",
                cur, page_type
            )));
        }
        cur = next;
    }

    Ok(IndexSummary {
        height: walk.leaf_depth.map(|d| d + 1).unwrap_or(0),
        num_entries: walk.num_entries,
        num_leaves: walk.leaves_in_order.len(),
    })
}
