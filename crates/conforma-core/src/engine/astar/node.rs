use std::cmp::Ordering;

/// Handle into a [`LinkArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkId(u32);

/// One branching decision: a (position, rotamer) assignment plus the parent
/// decision it extends.
#[derive(Debug, Clone, Copy)]
struct Link {
    parent: Option<LinkId>,
    pos: u32,
    rot: u32,
}

/// Append-only arena of branching decisions.
///
/// Decision chains form a DAG shared by sibling nodes: each frontier node
/// stores only the handle of its own decision, and reconstructing an
/// assignment walks parent handles back to the root. Records are never
/// removed, so handles stay valid for the lifetime of a search.
#[derive(Debug, Default)]
pub(crate) struct LinkArena {
    links: Vec<Link>,
}

impl LinkArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parent: Option<LinkId>, pos: usize, rot: usize) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(Link {
            parent,
            pos: pos as u32,
            rot: rot as u32,
        });
        id
    }

    /// Collects the decision chain ending at `link` into `out`, in
    /// leaf-to-root order.
    pub fn collect_decisions(&self, link: Option<LinkId>, out: &mut Vec<(usize, usize)>) {
        let mut current = link;
        while let Some(LinkId(id)) = current {
            let link = self.links[id as usize];
            out.push((link.pos as usize, link.rot as usize));
            current = link.parent;
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }
}

/// A frontier node: its decision handle plus cached scores.
///
/// Ordered for a min-first `BinaryHeap`: lowest score pops first, and equal
/// scores break ties by insertion sequence so enumeration is deterministic
/// for a fixed input.
#[derive(Debug)]
pub(crate) struct FrontierEntry {
    pub score: f64,
    pub gscore: f64,
    pub seq: u64,
    pub link: Option<LinkId>,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
