//! Accounting for the transient resources the load pipeline acquires.
//!
//! Every syntax tree, source buffer and file handle carries a [`Ticket`];
//! dropping the owner releases the ticket, so the counters read zero
//! whenever nothing is outstanding.

use std::{cell::Cell, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    SyntaxTree,
    SourceBuffer,
    FileHandle,
}

#[derive(Debug, Default)]
struct Counters {
    syntax_trees: Cell<usize>,
    source_buffers: Cell<usize>,
    open_files: Cell<usize>,
    files_closed: Cell<usize>,
}

impl Counters {
    fn live(&self, kind: ResourceKind) -> &Cell<usize> {
        match kind {
            ResourceKind::SyntaxTree => &self.syntax_trees,
            ResourceKind::SourceBuffer => &self.source_buffers,
            ResourceKind::FileHandle => &self.open_files,
        }
    }
}

/// Snapshot of the tracker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceStats {
    pub syntax_trees: usize,
    pub source_buffers: usize,
    pub open_files: usize,
    pub files_closed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceTracker(Rc<Counters>);

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, kind: ResourceKind) -> Ticket {
        let live = self.0.live(kind);
        live.set(live.get() + 1);
        Ticket {
            tracker: self.clone(),
            kind,
        }
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            syntax_trees: self.0.syntax_trees.get(),
            source_buffers: self.0.source_buffers.get(),
            open_files: self.0.open_files.get(),
            files_closed: self.0.files_closed.get(),
        }
    }
}

/// Proof that a resource is held. Released exactly once, on drop.
#[derive(Debug)]
pub struct Ticket {
    tracker: ResourceTracker,
    kind: ResourceKind,
}

impl Ticket {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let counters = &self.tracker.0;
        let live = counters.live(self.kind);
        live.set(live.get().saturating_sub(1));
        if self.kind == ResourceKind::FileHandle {
            counters.files_closed.set(counters.files_closed.get() + 1);
        }
    }
}
