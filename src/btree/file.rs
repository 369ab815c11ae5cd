//! The B+Tree index file manager: navigation, insertion with sibling
//! relocation and splits, interface-level deletion, and ordered scans.

use std::cmp::Ordering;

use log::debug;

use crate::btree::header_page::{self, IndexMeta};
use crate::btree::inner_page::InnerPage;
use crate::btree::key::IndexKey;
use crate::btree::leaf_page::{LeafPage, LEAF_HEADER_SIZE};
use crate::btree::{BTREE_EMPTY_PAGE, BTREE_INNER_PAGE, BTREE_LEAF_PAGE, NO_PAGE};
use crate::engine::Exec;
use crate::error::{StorageError, StorageResult};
use crate::event::Flow;
use crate::heap::FilePointer;
use crate::schema::{ColumnInfo, Schema};
use crate::storage::file::{DbFile, DbFileType};
use crate::tuple::Value;
use crate::util::HandyRwLock;

pub struct BTreeIndexFile {
    file: DbFile,
    key_columns: Vec<ColumnInfo>,
    meta: IndexMeta,
}

impl BTreeIndexFile {
    /// Create the index file: an empty tree is just a header page.
    pub fn create(
        ctx: &mut Exec,
        name: &str,
        table_schema: &Schema,
        meta: IndexMeta,
        page_size: usize,
    ) -> StorageResult<Self> {
        let key_columns = Self::project_columns(table_schema, &meta.column_indices)?;

        let file = ctx.fm.create_file(name, DbFileType::BTreeIndex, page_size)?;
        ctx.buffer.register_file(&file);

        let header = ctx.fetch(&file, 0, false)?;
        {
            let mut h = header.wl();
            header_page::write_meta(&mut h, &meta)?;
        }
        ctx.log_page(&header)?;
        ctx.unpin(&header);

        debug!("created index file {}", name);
        Ok(Self {
            file,
            key_columns,
            meta,
        })
    }

    pub fn open(ctx: &mut Exec, name: &str, table_schema: &Schema) -> StorageResult<Self> {
        let file = ctx.fm.open_file(name)?;
        if file.file_type() != DbFileType::BTreeIndex {
            return Err(StorageError::schema(format!(
                "{} is not an index file",
                name
            )));
        }
        ctx.buffer.register_file(&file);

        let header = ctx.fetch(&file, 0, false)?;
        let meta = header_page::read_meta(&header.rl())?;
        ctx.unpin(&header);

        let key_columns = Self::project_columns(table_schema, &meta.column_indices)?;
        Ok(Self {
            file,
            key_columns,
            meta,
        })
    }

    fn project_columns(schema: &Schema, indices: &[u8]) -> StorageResult<Vec<ColumnInfo>> {
        if indices.is_empty() {
            return Err(StorageError::schema("an index needs at least one column"));
        }
        indices
            .iter()
            .map(|&i| {
                if (i as usize) < schema.num_columns() {
                    Ok(schema.column(i as usize).clone())
                } else {
                    Err(StorageError::schema(format!(
                        "index references column {} of {}",
                        i,
                        schema.num_columns()
                    )))
                }
            })
            .collect()
    }

    pub fn file(&self) -> &DbFile {
        &self.file
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn unique(&self) -> bool {
        self.meta.unique
    }

    pub fn key_columns(&self) -> &[ColumnInfo] {
        &self.key_columns
    }

    /// Build the index key for a table row: the indexed columns plus the
    /// row's external reference as uniquifier.
    pub fn make_key(&self, row: &[Value], ptr: FilePointer) -> IndexKey {
        let values = self
            .meta
            .column_indices
            .iter()
            .map(|&i| row[i as usize].clone())
            .collect();
        IndexKey::new(values, ptr)
    }

    /// Entries above this size make deep pages unsplittable; surfaced as a
    /// schema problem at insert time.
    fn max_entry_size(&self) -> usize {
        self.file.page_size() / 4
    }

    fn header(&self, ctx: &mut Exec) -> StorageResult<crate::storage::page::PagePod> {
        ctx.fetch(&self.file, 0, false)
    }

    /// Walk from the root to the leaf that owns the search position,
    /// remembering the inner-page path. `None` on an empty tree.
    fn descend<F>(&self, ctx: &mut Exec, mut cmp: F) -> StorageResult<Option<(LeafPage, Vec<u32>)>>
    where
        F: FnMut(&IndexKey) -> StorageResult<Ordering>,
    {
        let header = self.header(ctx)?;
        let root = header_page::root_page_no(&header.rl());
        ctx.unpin(&header);
        if root == NO_PAGE {
            return Ok(None);
        }

        let mut cur = root as u32;
        let mut path = Vec::new();
        loop {
            let pod = ctx.fetch(&self.file, cur, false)?;
            let page_type = pod.rl().read_u8(0);
            match page_type {
                BTREE_INNER_PAGE => {
                    let inner = InnerPage::wrap(pod, &self.key_columns)?;
                    let child = inner.find_child(&mut cmp)?;
                    path.push(cur);
                    cur = child as u32;
                }
                BTREE_LEAF_PAGE => {
                    let leaf = LeafPage::wrap(pod, &self.key_columns)?;
                    return Ok(Some((leaf, path)));
                }
                other => {
                    return Err(StorageError::corrupt_index(
                        self.file.name(),
                        format!("page {} has type byte {}", cur, other),
                    ))
                }
            }
        }
    }

    /// Insert one key, relocating to siblings or splitting as needed.
    pub fn add_entry(&self, ctx: &mut Exec, key: &IndexKey) -> StorageResult<()> {
        let entry = key.encode(&self.key_columns)?;
        if entry.len() > self.max_entry_size() {
            return Err(StorageError::schema(format!(
                "index key of {} bytes exceeds the {}-byte bound",
                entry.len(),
                self.max_entry_size()
            )));
        }

        // Bootstrap: the first entry creates the root leaf.
        let header = self.header(ctx)?;
        if header_page::root_page_no(&header.rl()) == NO_PAGE {
            let leaf_no = self.alloc_page(ctx)?;
            let pod = ctx.fetch(&self.file, leaf_no as u32, true)?;
            {
                let mut p = pod.wl();
                LeafPage::init(&mut p, NO_PAGE);
            }
            {
                let mut h = header.wl();
                header_page::set_root_page_no(&mut h, leaf_no);
                header_page::set_first_leaf_page_no(&mut h, leaf_no);
            }
            ctx.log_page(&pod)?;
            ctx.log_page(&header)?;
            ctx.unpin(&pod);
            debug!("{}: created root leaf {}", self.file.name(), leaf_no);
        }
        ctx.unpin(&header);

        let (mut leaf, path) = self
            .descend(ctx, |k| Ok(key.compare(k)))?
            .expect("root exists after bootstrap");

        let (pos, exact) = leaf.find_position(key)?;
        if exact {
            // Full keys carry the tuple's own reference, so a collision means
            // the tree already holds this exact row.
            return Err(StorageError::DuplicateKey {
                index: self.file.name().to_string(),
                key: format!("{}", key),
            });
        }

        if leaf.free_space() >= entry.len() {
            leaf.insert_entry_at(pos, &entry)?;
            return ctx.log_page(leaf.page());
        }

        if let Some(&parent_no) = path.last() {
            if self.try_relocate_leaf(ctx, &mut leaf, parent_no, &entry, pos)? {
                return Ok(());
            }
        }

        self.split_leaf(ctx, leaf, path, &entry, pos)
    }

    /// Try to shed entries to the left then the right sibling so the new
    /// entry fits without a split. Returns true when it worked.
    fn try_relocate_leaf(
        &self,
        ctx: &mut Exec,
        leaf: &mut LeafPage,
        parent_no: u32,
        entry: &[u8],
        pos: usize,
    ) -> StorageResult<bool> {
        let parent_pod = ctx.fetch(&self.file, parent_no, false)?;
        let mut parent = InnerPage::wrap(parent_pod, &self.key_columns)?;
        let my_no = leaf.page_no() as u16;
        let my_idx = parent.pointer_index(my_no).ok_or_else(|| {
            StorageError::corrupt_index(
                self.file.name(),
                format!("leaf {} missing from parent {}", my_no, parent_no),
            )
        })?;

        // Left sibling: move a prefix of our entries onto its end.
        if my_idx > 0 {
            let sib_no = parent.pointer_at(my_idx - 1);
            let sib_pod = ctx.fetch(&self.file, sib_no as u32, false)?;
            let mut left = LeafPage::wrap(sib_pod, &self.key_columns)?;

            if let Some(k) = plan_left_move(leaf, &left, entry.len(), pos) {
                let goes_left = pos < k;
                let sep_bytes = if pos == k {
                    entry.to_vec()
                } else {
                    leaf.entry_bytes(k)
                };
                let delta = sep_bytes.len() as isize - parent.key_size(my_idx - 1) as isize;
                if delta <= parent.free_space() as isize {
                    let left_before = left.num_entries();
                    leaf.move_prefix_to(&mut left, k)?;
                    if goes_left {
                        left.insert_entry_at(left_before + pos, entry)?;
                    } else {
                        leaf.insert_entry_at(pos - k, entry)?;
                    }
                    parent.replace_key_at(my_idx - 1, &sep_bytes)?;

                    ctx.log_page(left.page())?;
                    ctx.log_page(leaf.page())?;
                    ctx.log_page(parent.page())?;
                    debug!(
                        "{}: relocated {} entries from leaf {} to left sibling {}",
                        self.file.name(),
                        k,
                        my_no,
                        sib_no
                    );
                    return Ok(true);
                }
            }
            ctx.unpin(left.page());
        }

        // Right sibling: move a suffix of our entries onto its front.
        if my_idx + 1 < parent.num_pointers() {
            let sib_no = parent.pointer_at(my_idx + 1);
            let sib_pod = ctx.fetch(&self.file, sib_no as u32, false)?;
            let mut right = LeafPage::wrap(sib_pod, &self.key_columns)?;

            if let Some(k) = plan_right_move(leaf, &right, entry.len(), pos) {
                let n = leaf.num_entries();
                let goes_right = pos > n - k;
                let sep_bytes = leaf.entry_bytes(n - k);
                let delta = sep_bytes.len() as isize - parent.key_size(my_idx) as isize;
                if delta <= parent.free_space() as isize {
                    leaf.move_suffix_to(&mut right, k)?;
                    if goes_right {
                        right.insert_entry_at(pos - (n - k), entry)?;
                    } else {
                        leaf.insert_entry_at(pos, entry)?;
                    }
                    parent.replace_key_at(my_idx, &sep_bytes)?;

                    ctx.log_page(right.page())?;
                    ctx.log_page(leaf.page())?;
                    ctx.log_page(parent.page())?;
                    debug!(
                        "{}: relocated {} entries from leaf {} to right sibling {}",
                        self.file.name(),
                        k,
                        my_no,
                        sib_no
                    );
                    return Ok(true);
                }
            }
            ctx.unpin(right.page());
        }

        Ok(false)
    }

    /// Split a full leaf around the insertion, splice the new leaf into the
    /// chain, and promote its first key.
    fn split_leaf(
        &self,
        ctx: &mut Exec,
        mut leaf: LeafPage,
        path: Vec<u32>,
        entry: &[u8],
        pos: usize,
    ) -> StorageResult<()> {
        let n = leaf.num_entries();
        let total = leaf.entries_byte_size(0, n);
        let cap = self.file.page_size() - LEAF_HEADER_SIZE;

        // Split index m keeps [0, m) left, moves [m, n) right; pick the most
        // balanced m where the side receiving the new entry still has room.
        let mut best: Option<(usize, usize)> = None;
        for m in 1..=n {
            let left_bytes = leaf.entries_byte_size(0, m);
            let right_bytes = total - left_bytes;
            let fits = if pos < m {
                left_bytes + entry.len() <= cap && right_bytes <= cap
            } else {
                left_bytes <= cap && right_bytes + entry.len() <= cap
            };
            // A right side left empty is only allowed when the new entry
            // becomes its sole occupant.
            if m == n && pos < n {
                continue;
            }
            if fits {
                let score = (2 * left_bytes).max(2 * right_bytes) - total;
                match best {
                    Some((_, s)) if s <= score => {}
                    _ => best = Some((m, score)),
                }
            }
        }
        let m = match best {
            Some((m, _)) => m,
            None => {
                return Err(StorageError::corrupt_index(
                    self.file.name(),
                    format!("leaf {} cannot be split", leaf.page_no()),
                ))
            }
        };

        let new_no = self.alloc_page(ctx)?;
        let new_pod = ctx.fetch(&self.file, new_no as u32, true)?;
        {
            let mut p = new_pod.wl();
            LeafPage::init(&mut p, leaf.next_leaf());
        }
        let mut new_leaf = LeafPage::wrap(new_pod, &self.key_columns)?;

        leaf.move_suffix_to(&mut new_leaf, n - m)?;
        leaf.set_next_leaf(new_no);

        if pos < m {
            leaf.insert_entry_at(pos, entry)?;
        } else {
            new_leaf.insert_entry_at(pos - m, entry)?;
        }

        let sep_bytes = new_leaf.entry_bytes(0);
        ctx.log_page(leaf.page())?;
        ctx.log_page(new_leaf.page())?;
        debug!(
            "{}: split leaf {} -> {} ({} entries moved)",
            self.file.name(),
            leaf.page_no(),
            new_no,
            n - m
        );

        let left_no = leaf.page_no() as u16;
        ctx.unpin(new_leaf.page());
        self.insert_into_parent(ctx, path, left_no, sep_bytes, new_no)
    }

    /// Install a `(separator, new right child)` pair produced by a child
    /// split, recursing with relocation-then-split when the parent is full.
    fn insert_into_parent(
        &self,
        ctx: &mut Exec,
        mut path: Vec<u32>,
        left_no: u16,
        sep: Vec<u8>,
        right_no: u16,
    ) -> StorageResult<()> {
        let parent_no = match path.pop() {
            None => {
                // The split child was the root: grow the tree by one level.
                let root_no = self.alloc_page(ctx)?;
                let pod = ctx.fetch(&self.file, root_no as u32, true)?;
                {
                    let mut p = pod.wl();
                    InnerPage::init(&mut p, left_no, &sep, right_no);
                }
                ctx.log_page(&pod)?;
                ctx.unpin(&pod);

                let header = self.header(ctx)?;
                {
                    let mut h = header.wl();
                    header_page::set_root_page_no(&mut h, root_no);
                }
                ctx.log_page(&header)?;
                ctx.unpin(&header);
                debug!("{}: new root {} installed", self.file.name(), root_no);
                return Ok(());
            }
            Some(no) => no,
        };

        let pod = ctx.fetch(&self.file, parent_no, false)?;
        let mut parent = InnerPage::wrap(pod, &self.key_columns)?;

        if parent.free_space() >= sep.len() + 2 {
            parent.add_entry(left_no, &sep, right_no)?;
            return ctx.log_page(parent.page());
        }

        if let Some(&gp_no) = path.last() {
            if self.try_relocate_inner(ctx, &mut parent, gp_no, left_no, &sep, right_no)? {
                return Ok(());
            }
        }

        self.split_inner(ctx, parent, path, left_no, sep, right_no)
    }

    /// Inner-node relocation: shift pointers to a sibling through the
    /// grandparent, transferring the grandparent's separator down and
    /// promoting a new one up. The pending entry rides along in the merged
    /// view.
    fn try_relocate_inner(
        &self,
        ctx: &mut Exec,
        node: &mut InnerPage,
        gp_no: u32,
        left_child: u16,
        sep: &[u8],
        right_child: u16,
    ) -> StorageResult<bool> {
        let gp_pod = ctx.fetch(&self.file, gp_no, false)?;
        let mut gp = InnerPage::wrap(gp_pod, &self.key_columns)?;
        let my_no = node.page_no() as u16;
        let my_idx = gp.pointer_index(my_no).ok_or_else(|| {
            StorageError::corrupt_index(
                self.file.name(),
                format!("inner {} missing from parent {}", my_no, gp_no),
            )
        })?;

        // Merged view of this node with the pending entry spliced in.
        let (mut ptrs, mut keys) = node.to_parts();
        let at = ptrs
            .iter()
            .position(|&p| p == left_child)
            .ok_or_else(|| {
                StorageError::corrupt_index(
                    self.file.name(),
                    format!("pointer {} missing from inner {}", left_child, my_no),
                )
            })?;
        ptrs.insert(at + 1, right_child);
        keys.insert(at, sep.to_vec());
        let n = ptrs.len();
        let page_size = self.file.page_size();

        // Left sibling: move our k leading pointers onto its end.
        if my_idx > 0 {
            let sib_no = gp.pointer_at(my_idx - 1);
            let sib_pod = ctx.fetch(&self.file, sib_no as u32, false)?;
            let mut sib = InnerPage::wrap(sib_pod, &self.key_columns)?;
            let parent_sep = gp.key_bytes(my_idx - 1);

            for k in 1..=n.saturating_sub(2) {
                let moved_keys: usize = keys[..k - 1].iter().map(|b| b.len()).sum();
                let sib_gain = parent_sep.len() + 2 * k + moved_keys;
                let node_after: usize =
                    3 + 2 * (n - k) + keys[k..].iter().map(|b| b.len()).sum::<usize>();
                let new_gp_sep = &keys[k - 1];
                let gp_delta = new_gp_sep.len() as isize - parent_sep.len() as isize;

                if sib.free_space() >= sib_gain
                    && node_after <= page_size
                    && gp_delta <= gp.free_space() as isize
                {
                    let new_gp_sep = new_gp_sep.clone();
                    let (mut sp, mut sk) = sib.to_parts();
                    sk.push(parent_sep.clone());
                    for i in 0..k {
                        sp.push(ptrs[i]);
                        if i + 1 < k {
                            sk.push(keys[i].clone());
                        }
                    }
                    {
                        let mut p = sib.page().wl();
                        InnerPage::rebuild(&mut p, &sp, &sk);
                    }
                    {
                        let mut p = node.page().wl();
                        InnerPage::rebuild(&mut p, &ptrs[k..], &keys[k..]);
                    }
                    gp.replace_key_at(my_idx - 1, &new_gp_sep)?;

                    ctx.log_page(sib.page())?;
                    ctx.log_page(node.page())?;
                    ctx.log_page(gp.page())?;
                    debug!(
                        "{}: moved {} pointers from inner {} to left sibling {}",
                        self.file.name(),
                        k,
                        my_no,
                        sib_no
                    );
                    return Ok(true);
                }
            }
            ctx.unpin(sib.page());
        }

        // Right sibling: move our k trailing pointers onto its front.
        if my_idx + 1 < gp.num_pointers() {
            let sib_no = gp.pointer_at(my_idx + 1);
            let sib_pod = ctx.fetch(&self.file, sib_no as u32, false)?;
            let mut sib = InnerPage::wrap(sib_pod, &self.key_columns)?;
            let parent_sep = gp.key_bytes(my_idx);

            for k in 1..=n.saturating_sub(2) {
                let moved_key_bytes: usize = keys[n - k..n - 1].iter().map(|b| b.len()).sum();
                let sib_gain = parent_sep.len() + 2 * k + moved_key_bytes;
                let node_after: usize = 3
                    + 2 * (n - k)
                    + keys[..n - k - 1].iter().map(|b| b.len()).sum::<usize>();
                let new_gp_sep = &keys[n - k - 1];
                let gp_delta = new_gp_sep.len() as isize - parent_sep.len() as isize;

                if sib.free_space() >= sib_gain
                    && node_after <= page_size
                    && gp_delta <= gp.free_space() as isize
                {
                    let new_gp_sep = new_gp_sep.clone();
                    let (sp, sk) = sib.to_parts();
                    let mut new_ptrs: Vec<u16> = ptrs[n - k..].to_vec();
                    new_ptrs.extend_from_slice(&sp);
                    let mut new_keys: Vec<Vec<u8>> = keys[n - k..n - 1].to_vec();
                    new_keys.push(parent_sep.clone());
                    new_keys.extend(sk);

                    {
                        let mut p = sib.page().wl();
                        InnerPage::rebuild(&mut p, &new_ptrs, &new_keys);
                    }
                    {
                        let mut p = node.page().wl();
                        InnerPage::rebuild(&mut p, &ptrs[..n - k], &keys[..n - k - 1]);
                    }
                    gp.replace_key_at(my_idx, &new_gp_sep)?;

                    ctx.log_page(sib.page())?;
                    ctx.log_page(node.page())?;
                    ctx.log_page(gp.page())?;
                    debug!(
                        "{}: moved {} pointers from inner {} to right sibling {}",
                        self.file.name(),
                        k,
                        my_no,
                        sib_no
                    );
                    return Ok(true);
                }
            }
            ctx.unpin(sib.page());
        }

        Ok(false)
    }

    /// Split a full inner node through its merged view, promoting the middle
    /// key.
    fn split_inner(
        &self,
        ctx: &mut Exec,
        parent: InnerPage,
        path: Vec<u32>,
        left_no: u16,
        sep: Vec<u8>,
        right_no: u16,
    ) -> StorageResult<()> {
        let (mut ptrs, mut keys) = parent.to_parts();
        let at = ptrs.iter().position(|&p| p == left_no).ok_or_else(|| {
            StorageError::corrupt_index(
                self.file.name(),
                format!(
                    "pointer {} missing from inner {}",
                    left_no,
                    parent.page_no()
                ),
            )
        })?;
        ptrs.insert(at + 1, right_no);
        keys.insert(at, sep);

        let n = ptrs.len();
        if n < 4 {
            return Err(StorageError::corrupt_index(
                self.file.name(),
                format!("inner {} too small to split", parent.page_no()),
            ));
        }

        // Promote key s; left keeps pointers [0, s], right takes [s+1, n).
        let total: usize = 2 * n + keys.iter().map(|b| b.len()).sum::<usize>();
        let mut s = 1;
        let mut best_score = usize::MAX;
        for cand in 1..=n - 3 {
            let left_size: usize =
                2 * (cand + 1) + keys[..cand].iter().map(|b| b.len()).sum::<usize>();
            let score = (2 * left_size).max(2 * (total - left_size)) - total;
            if score < best_score {
                best_score = score;
                s = cand;
            }
        }

        let promoted = keys[s].clone();
        let parent_no = parent.page_no();

        {
            let mut p = parent.page().wl();
            InnerPage::rebuild(&mut p, &ptrs[..=s], &keys[..s]);
        }
        let new_no = self.alloc_page(ctx)?;
        let new_pod = ctx.fetch(&self.file, new_no as u32, true)?;
        {
            let mut p = new_pod.wl();
            InnerPage::rebuild(&mut p, &ptrs[s + 1..], &keys[s + 1..]);
        }

        ctx.log_page(parent.page())?;
        ctx.log_page(&new_pod)?;
        ctx.unpin(&new_pod);
        debug!(
            "{}: split inner {} -> {}",
            self.file.name(),
            parent_no,
            new_no
        );

        self.insert_into_parent(ctx, path, parent_no as u16, promoted, new_no)
    }

    /// Remove one exact key from its leaf. Rebalancing is deliberately
    /// deferred; the leaf chain and parent separators stay valid without it.
    pub fn delete_entry(&self, ctx: &mut Exec, key: &IndexKey) -> StorageResult<bool> {
        let descent = self.descend(ctx, |k| Ok(key.compare(k)))?;
        let (mut leaf, _path) = match descent {
            Some(found) => found,
            None => return Ok(false),
        };

        let (pos, exact) = leaf.find_position(key)?;
        if !exact {
            return Ok(false);
        }
        leaf.remove_entry(pos);
        ctx.log_page(leaf.page())?;
        Ok(true)
    }

    /// First entry whose logical key is at-or-after `prefix`.
    pub fn find_first(&self, ctx: &mut Exec, prefix: &[Value]) -> StorageResult<Option<IndexKey>> {
        let mut found = None;
        self.scan_from(ctx, prefix, |k| {
            found = Some(k.clone());
            Ok(Flow::Stop)
        })?;
        Ok(found)
    }

    /// Whether any entry carries exactly this logical key prefix.
    pub fn contains_logical_key(&self, ctx: &mut Exec, prefix: &[Value]) -> StorageResult<bool> {
        Ok(self
            .find_first(ctx, prefix)?
            .map(|k| k.matches_prefix(prefix))
            .unwrap_or(false))
    }

    /// In-order scan of the whole index via the leaf chain.
    pub fn scan_all<F>(&self, ctx: &mut Exec, mut f: F) -> StorageResult<()>
    where
        F: FnMut(&IndexKey) -> StorageResult<Flow>,
    {
        let header = self.header(ctx)?;
        let first = header_page::first_leaf_page_no(&header.rl());
        ctx.unpin(&header);
        if first == NO_PAGE {
            return Ok(());
        }
        self.scan_leaves(ctx, first, 0, &mut f)
    }

    /// In-order scan starting at the first entry at-or-after `prefix`.
    pub fn scan_from<F>(&self, ctx: &mut Exec, prefix: &[Value], mut f: F) -> StorageResult<()>
    where
        F: FnMut(&IndexKey) -> StorageResult<Flow>,
    {
        let descent = self.descend(ctx, |k| Ok(IndexKey::compare_prefix(prefix, k)))?;
        let (leaf, _path) = match descent {
            Some(found) => found,
            None => return Ok(()),
        };
        let start = leaf.find_prefix_position(prefix)?;
        let leaf_no = leaf.page_no() as u16;
        ctx.unpin(leaf.page());
        self.scan_leaves(ctx, leaf_no, start, &mut f)
    }

    fn scan_leaves<F>(
        &self,
        ctx: &mut Exec,
        mut leaf_no: u16,
        mut idx: usize,
        f: &mut F,
    ) -> StorageResult<()>
    where
        F: FnMut(&IndexKey) -> StorageResult<Flow>,
    {
        while leaf_no != NO_PAGE {
            let pod = ctx.fetch(&self.file, leaf_no as u32, false)?;
            let leaf = LeafPage::wrap(pod, &self.key_columns)?;

            while idx < leaf.num_entries() {
                let key = leaf.key_at(idx)?;
                if let Flow::Stop = f(&key)? {
                    ctx.unpin(leaf.page());
                    return Ok(());
                }
                idx += 1;
            }

            let next = leaf.next_leaf();
            ctx.unpin(leaf.page());
            leaf_no = next;
            idx = 0;
        }
        Ok(())
    }

    /// Take a page from the free list, or extend the file.
    pub(crate) fn alloc_page(&self, ctx: &mut Exec) -> StorageResult<u16> {
        let header = self.header(ctx)?;
        let head = header_page::first_empty_page_no(&header.rl());

        let no = if head != NO_PAGE {
            let pod = ctx.fetch(&self.file, head as u32, false)?;
            let next = pod.rl().read_u16(1);
            {
                let mut h = header.wl();
                header_page::set_first_empty_page_no(&mut h, next);
            }
            {
                let mut p = pod.wl();
                let size = p.page_size();
                p.zero_range(0, size);
            }
            ctx.log_page(&pod)?;
            ctx.log_page(&header)?;
            ctx.unpin(&pod);
            debug!("{}: reusing empty page {}", self.file.name(), head);
            head
        } else {
            let count = ctx.fm.page_count(&self.file)?;
            if count > u16::MAX as u32 {
                return Err(StorageError::schema(format!(
                    "index {} is full",
                    self.file.name()
                )));
            }
            let pod = ctx.fetch(&self.file, count, true)?;
            ctx.unpin(&pod);
            count as u16
        };

        ctx.unpin(&header);
        Ok(no)
    }

    /// Push a page onto the free list, zeroing its remainder.
    pub(crate) fn release_page(&self, ctx: &mut Exec, no: u16) -> StorageResult<()> {
        let header = self.header(ctx)?;
        let head = header_page::first_empty_page_no(&header.rl());

        let pod = ctx.fetch(&self.file, no as u32, false)?;
        {
            let mut p = pod.wl();
            let size = p.page_size();
            p.zero_range(0, size);
            p.write_u8(0, BTREE_EMPTY_PAGE);
            p.write_u16(1, head);
        }
        {
            let mut h = header.wl();
            header_page::set_first_empty_page_no(&mut h, no);
        }
        ctx.log_page(&pod)?;
        ctx.log_page(&header)?;
        ctx.unpin(&pod);
        ctx.unpin(&header);
        Ok(())
    }
}

/// Smallest count of leading entries whose move to the left sibling lets the
/// new entry fit; `None` when no count works.
fn plan_left_move(leaf: &LeafPage, left: &LeafPage, entry_len: usize, pos: usize) -> Option<usize> {
    let n = leaf.num_entries();
    for k in 1..=n {
        // Draining the page entirely is only sound when the new entry stays
        // behind as its sole occupant.
        if k == n && pos < n {
            break;
        }
        let moved = leaf.entries_byte_size(0, k);
        if left.free_space() < moved {
            break;
        }
        let goes_left = pos < k;
        let left_need = moved + if goes_left { entry_len } else { 0 };
        if left.free_space() < left_need {
            continue;
        }
        if goes_left || leaf.free_space() + moved >= entry_len {
            return Some(k);
        }
    }
    None
}

/// Smallest count of trailing entries whose move to the right sibling lets
/// the new entry fit.
fn plan_right_move(
    leaf: &LeafPage,
    right: &LeafPage,
    entry_len: usize,
    pos: usize,
) -> Option<usize> {
    let n = leaf.num_entries();
    for k in 1..=n {
        let moved = leaf.entries_byte_size(n - k, n);
        if right.free_space() < moved {
            break;
        }
        let goes_right = pos > n - k;
        let right_need = moved + if goes_right { entry_len } else { 0 };
        if right.free_space() < right_need {
            continue;
        }
        if goes_right || leaf.free_space() + moved >= entry_len {
            return Some(k);
        }
    }
    None
}
