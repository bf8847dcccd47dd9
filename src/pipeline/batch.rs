//! Partitioning of a job's pages into generation batches.

use std::ops::RangeInclusive;

/// A contiguous run of pages sent to the VLM in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position of this batch within the job.
    pub index: usize,
    /// 1-based first page.
    pub first_page: usize,
    /// 1-based last page, inclusive.
    pub last_page: usize,
}

impl Batch {
    pub fn pages(&self) -> RangeInclusive<usize> {
        self.first_page..=self.last_page
    }

    pub fn page_count(&self) -> usize {
        self.last_page + 1 - self.first_page
    }

    /// 0-based slice bounds into an ordered page list.
    pub fn span(&self) -> std::ops::Range<usize> {
        (self.first_page - 1)..self.last_page
    }
}

/// Number of batches for `page_count` pages, i.e. `ceil(page_count / batch_size)`.
pub fn batch_count(page_count: usize, batch_size: usize) -> usize {
    page_count.div_ceil(batch_size.max(1))
}

/// Split pages `1..=page_count` into consecutive batches of `batch_size`.
/// Only the last batch may be shorter.
pub fn partition(page_count: usize, batch_size: usize) -> Vec<Batch> {
    let size = batch_size.max(1);
    (0..batch_count(page_count, size))
        .map(|i| {
            let first_page = i * size + 1;
            Batch {
                index: i + 1,
                first_page,
                last_page: (first_page + size - 1).min(page_count),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_five_pages_in_tens() {
        let batches = partition(25, 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].pages(), 1..=10);
        assert_eq!(batches[1].pages(), 11..=20);
        assert_eq!(batches[2].pages(), 21..=25);
        assert_eq!(batches[2].page_count(), 5);
        assert_eq!(batches[1].span(), 10..20);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let batches = partition(20, 10);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.page_count() == 10));
    }

    #[test]
    fn batch_larger_than_document() {
        let batches = partition(3, 10);
        assert_eq!(batches, vec![Batch { index: 1, first_page: 1, last_page: 3 }]);
    }

    #[test]
    fn zero_pages_means_zero_batches() {
        assert!(partition(0, 10).is_empty());
        assert_eq!(batch_count(0, 10), 0);
    }

    #[test]
    fn batch_size_zero_is_treated_as_one() {
        assert_eq!(batch_count(4, 0), 4);
        assert_eq!(partition(4, 0).len(), 4);
    }

    #[test]
    fn batches_cover_every_page_once() {
        for pages in 1..40 {
            for size in 1..12 {
                let batches = partition(pages, size);
                assert_eq!(batches.len(), batch_count(pages, size));
                let covered: Vec<usize> = batches.iter().flat_map(|b| b.pages()).collect();
                assert_eq!(covered, (1..=pages).collect::<Vec<_>>());
            }
        }
    }
}
