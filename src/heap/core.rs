/// Binary min-heap over signed 64-bit integers.
///
/// The ordering primitive of the sort engine: each worker drains its block of
/// the shared buffer into one of these, and the merge phase repeatedly selects
/// the smallest minimum across all worker heaps. Backed by a contiguous `Vec`
/// with the usual implicit-tree layout (children of `i` at `2i+1`/`2i+2`).
#[derive(Debug, Default)]
pub struct Heap {
    data: Vec<i64>,
}

impl Heap {
    pub fn new() -> Self {
        Heap { data: Vec::new() }
    }

    /// Pre-sized heap for callers that know how many values a block holds.
    pub fn with_capacity(capacity: usize) -> Self {
        Heap {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Insert a value, restoring the heap property by sifting up.
    /// Amortized O(log n).
    pub fn push(&mut self, value: i64) {
        self.data.push(value);
        self.sift_up(self.data.len() - 1);
    }

    /// Remove and return the smallest value, or `None` on an empty heap.
    /// The root is swapped with the last leaf, then sifted down. O(log n).
    pub fn pop(&mut self) -> Option<i64> {
        if self.data.is_empty() {
            return None;
        }
        let last = self.data.len() - 1;
        self.data.swap(0, last);
        let min = self.data.pop();
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// The smallest value without removing it. O(1).
    #[inline]
    pub fn peek_min(&self) -> Option<i64> {
        self.data.first().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Walk a new leaf up its parent chain, swapping while it is smaller.
    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.data[index] < self.data[parent] {
                self.data.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    /// Walk the root down, swapping with the smaller eligible child until the
    /// heap property holds or a leaf is reached.
    fn sift_down(&mut self, mut index: usize) {
        let size = self.data.len();
        loop {
            let left = 2 * index + 1;
            let right = 2 * index + 2;
            let mut smallest = index;

            if left < size && self.data[left] < self.data[smallest] {
                smallest = left;
            }
            if right < size && self.data[right] < self.data[smallest] {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.data.swap(index, smallest);
            index = smallest;
        }
    }
}
