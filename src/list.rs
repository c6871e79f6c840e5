//! Intrusive doubly linked list
//!
//! Nodes live embedded at the start of the payload they link (for the
//! buddy allocator: the leading bytes of a free block), so list membership
//! costs no extra allocation and a node address is the payload address.
//! Nodes are addressed as `usize`; address 0 stands for an absent node and
//! is tolerated by every mutator as a silent no-op.

#[cfg(feature = "log")]
use log::warn;

/// A list node: "previous" and "next" handles.
///
/// When a node is not a member of any list, both handles are `None`.
#[derive(Debug, Clone, Copy)]
pub struct ListNode {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl ListNode {
    /// Create an unlinked node.
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }

    /// Whether the node is currently a member of some list.
    pub const fn is_linked(&self) -> bool {
        self.prev.is_some() || self.next.is_some()
    }
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Dereference a node address.
///
/// The address must point to a live `ListNode` for the duration of the
/// borrow; list users guarantee this by construction (nodes live inside
/// memory the list owner controls).
fn node<'a>(addr: usize) -> &'a ListNode {
    unsafe { &*(addr as *const ListNode) }
}

fn node_mut<'a>(addr: usize) -> &'a mut ListNode {
    unsafe { &mut *(addr as *mut ListNode) }
}

/// An intrusive doubly linked list of nodes addressed as `usize`.
///
/// Invariants: empty ⇔ head and tail are `None` ⇔ `len == 0`; traversal
/// from head via `next` and from tail via `prev` visit the same nodes in
/// opposite orders.
pub struct LinkedList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl LinkedList {
    /// Create a new empty list.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Whether the list has no members.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cached element count.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Link `new` in front of the current head.
    pub fn push_front(&mut self, new: usize) {
        if new == 0 {
            return;
        }
        *node_mut(new) = ListNode {
            prev: None,
            next: self.head,
        };
        match self.head {
            Some(head) => node_mut(head).prev = Some(new),
            None => self.tail = Some(new),
        }
        self.head = Some(new);
        self.len += 1;
    }

    /// Link `new` behind the current tail.
    pub fn push_back(&mut self, new: usize) {
        if new == 0 {
            return;
        }
        *node_mut(new) = ListNode {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => node_mut(tail).next = Some(new),
            None => self.head = Some(new),
        }
        self.tail = Some(new);
        self.len += 1;
    }

    /// Link `new` immediately after `after`, which must be a member.
    pub fn insert_after(&mut self, after: usize, new: usize) {
        if after == 0 || new == 0 {
            return;
        }
        let next = node(after).next;
        *node_mut(new) = ListNode {
            prev: Some(after),
            next,
        };
        node_mut(after).next = Some(new);
        match next {
            Some(next) => node_mut(next).prev = Some(new),
            None => self.tail = Some(new),
        }
        self.len += 1;
    }

    /// Link `new` immediately before `before`, which must be a member.
    pub fn insert_before(&mut self, before: usize, new: usize) {
        if before == 0 || new == 0 {
            return;
        }
        let prev = node(before).prev;
        *node_mut(new) = ListNode {
            prev,
            next: Some(before),
        };
        node_mut(before).prev = Some(new);
        match prev {
            Some(prev) => node_mut(prev).next = Some(new),
            None => self.head = Some(new),
        }
        self.len += 1;
    }

    /// Unlink and return the head node, resetting its handles.
    pub fn pop_front(&mut self) -> Option<usize> {
        let head = self.head?;
        let next = node(head).next;
        self.head = next;
        match next {
            Some(next) => node_mut(next).prev = None,
            None => self.tail = None,
        }
        *node_mut(head) = ListNode::new();
        self.len -= 1;
        Some(head)
    }

    /// Unlink and return the tail node, resetting its handles.
    pub fn pop_back(&mut self) -> Option<usize> {
        let tail = self.tail?;
        let prev = node(tail).prev;
        self.tail = prev;
        match prev {
            Some(prev) => node_mut(prev).next = None,
            None => self.head = None,
        }
        *node_mut(tail) = ListNode::new();
        self.len -= 1;
        Some(tail)
    }

    /// Unlink `member`, resetting its handles.
    ///
    /// `member` must currently be a member of this list; verifying
    /// membership is the caller's responsibility (see [`Self::contains`]).
    pub fn remove(&mut self, member: usize) {
        if member == 0 {
            return;
        }
        let ListNode { prev, next } = *node(member);
        match prev {
            Some(prev) => node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => node_mut(next).prev = prev,
            None => self.tail = prev,
        }
        *node_mut(member) = ListNode::new();
        self.len -= 1;
    }

    /// Linear membership scan.
    pub fn contains(&self, member: usize) -> bool {
        if member == 0 {
            return false;
        }
        let mut current = self.head;
        let mut visited = 0;
        while let Some(addr) = current {
            if visited > self.len {
                warn!("linked list: cycle detected during membership scan");
                return false;
            }
            if addr == member {
                return true;
            }
            current = node(addr).next;
            visited += 1;
        }
        false
    }

    /// Iterate over node addresses from head to tail.
    ///
    /// The iterator does not borrow the list and captures the successor
    /// before each node is yielded, so the yielded node may be unlinked
    /// from the list inside the loop body. Unlinking any *other* node
    /// during iteration is not supported.
    pub fn iter(&self) -> Iter {
        Iter { current: self.head }
    }
}

impl Default for LinkedList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over node addresses of a [`LinkedList`].
pub struct Iter {
    current: Option<usize>,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.current?;
        self.current = node(addr).next;
        Some(addr)
    }
}
