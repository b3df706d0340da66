#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionOrder
{
    Largest,
    Smallest,
}

///
/// Fixed size top-K (or bottom-K) selection kept in two parallel arrays.
/// Every slot starts at `(None, floor)`; an offered value replaces the worst
/// slot only if it is strictly better, so values not better than the floor
/// never enter and ties keep the first value seen. The worst slot is found
/// again by a linear scan after each replacement, which is cheap because K is
/// a small per-round budget.
///
pub struct BoundedSelection<T>
{
    items: Vec<Option<T>>,
    values: Vec<f64>,
    worst: usize,
    order: SelectionOrder,
    offered: usize,
}

impl<T> BoundedSelection<T>
{
    pub fn largest(capacity: usize, floor: f64) -> Self
    {
        Self::new(capacity, floor, SelectionOrder::Largest)
    }

    pub fn smallest(capacity: usize, ceiling: f64) -> Self
    {
        Self::new(capacity, ceiling, SelectionOrder::Smallest)
    }

    fn new(capacity: usize, initial: f64, order: SelectionOrder) -> Self
    {
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);
        Self { items, values: vec![initial; capacity], worst: 0, order, offered: 0 }
    }

    #[inline]
    fn better(&self, a: f64, b: f64) -> bool
    {
        match self.order
        {
            SelectionOrder::Largest => a > b,
            SelectionOrder::Smallest => a < b,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize
    {
        self.values.len()
    }

    ///
    /// Number of values offered so far, accepted or not.
    ///
    #[inline]
    pub fn offered(&self) -> usize
    {
        self.offered
    }

    ///
    /// Number of filled slots.
    ///
    pub fn len(&self) -> usize
    {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn is_empty(&self) -> bool
    {
        self.items.iter().all(|i| i.is_none())
    }

    ///
    /// Value of the slot that is replaced next, `None` if the capacity is zero.
    ///
    pub fn worst_value(&self) -> Option<f64>
    {
        self.values.get(self.worst).copied()
    }

    ///
    /// Returns true if `item` took a slot.
    ///
    pub fn offer(&mut self, item: T, value: f64) -> bool
    {
        self.offered += 1;
        if self.values.is_empty() || !self.better(value, self.values[self.worst])
        {
            return false;
        }
        self.items[self.worst] = Some(item);
        self.values[self.worst] = value;
        let mut worst = 0;
        for k in 1..self.values.len()
        {
            if self.better(self.values[worst], self.values[k])
            {
                worst = k;
            }
        }
        self.worst = worst;
        true
    }

    ///
    /// Filled slots, best first. Equal values keep their slot order.
    ///
    pub fn into_sorted(self) -> Vec<(T, f64)>
    {
        let order = self.order;
        let mut selected: Vec<(T, f64)> = self.items.into_iter().zip(self.values).filter_map(|(item, value)| item.map(|item| (item, value))).collect();
        selected.sort_by(|a, b|
        {
            match order
            {
                SelectionOrder::Largest => b.1.total_cmp(&a.1),
                SelectionOrder::Smallest => a.1.total_cmp(&b.1),
            }
        });
        selected
    }
}

#[test]
fn check_top_k_selection()
{
    let mut selection = BoundedSelection::largest(2, 0.0);
    for (i, v) in [0.5, 2.0, -1.0, 1.0, 3.0, 0.0, 1.0].into_iter().enumerate()
    {
        selection.offer(i, v);
    }
    assert_eq!(selection.offered(), 7);
    assert_eq!(selection.into_sorted(), vec![(4, 3.0), (1, 2.0)]);
}

#[test]
fn check_selection_floor_and_ties()
{
    let mut selection = BoundedSelection::largest(3, 1.0);
    assert!(!selection.offer("below", 0.5));
    assert!(!selection.offer("equal", 1.0));
    assert!(!selection.offer("nan", f64::NAN));
    assert!(selection.offer("a", 2.0));
    assert!(selection.offer("b", 2.0));
    assert!(selection.offer("c", 2.0));
    assert!(!selection.offer("d", 2.0));
    assert_eq!(selection.len(), 3);
    let names: Vec<_> = selection.into_sorted().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn check_bottom_k_and_zero_capacity()
{
    let mut selection = BoundedSelection::smallest(2, 1.0);
    for (i, v) in [0.5, 0.1, 2.0, 0.3].into_iter().enumerate()
    {
        selection.offer(i, v);
    }
    assert_eq!(selection.into_sorted(), vec![(1, 0.1), (3, 0.3)]);
    let mut empty = BoundedSelection::largest(0, 0.0);
    assert!(!empty.offer(1, 10.0));
    assert!(empty.is_empty());
    assert!(empty.worst_value().is_none());
}
