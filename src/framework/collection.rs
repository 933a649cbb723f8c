use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHasher};

use super::{ExecutionContext, FrameworkError};

/// Values a [`Collection`] can hold.
pub trait Element: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Element for T {}

type PartitionFn<S, T> = dyn Fn(usize, Vec<S>) -> Result<Vec<T>, FrameworkError> + Send + Sync;
type ShuffleFn<S, T> =
    dyn Fn(&ExecutionContext, Vec<Vec<S>>) -> Result<Vec<Vec<T>>, FrameworkError> + Send + Sync;
type LoadFn<T> = dyn Fn(usize) -> Result<Vec<T>, FrameworkError> + Send + Sync;

/// One node of a collection's lineage graph.
trait Lineage<T>: Send + Sync {
    fn num_partitions(&self) -> usize;

    fn compute(&self, ctx: &ExecutionContext) -> Result<Vec<Vec<T>>, FrameworkError>;

    fn describe(&self) -> String;
}

struct Materialized<T> {
    partitions: Arc<Vec<Vec<T>>>,
}

impl<T: Element> Lineage<T> for Materialized<T> {
    fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn compute(&self, _ctx: &ExecutionContext) -> Result<Vec<Vec<T>>, FrameworkError> {
        Ok(self.partitions.as_ref().clone())
    }

    fn describe(&self) -> String {
        format!("materialized[{}]", self.partitions.len())
    }
}

struct Loaded<T> {
    num_partitions: usize,
    label: String,
    load: Arc<LoadFn<T>>,
}

impl<T: Element> Lineage<T> for Loaded<T> {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<Vec<Vec<T>>, FrameworkError> {
        ctx.install(|| {
            (0..self.num_partitions)
                .into_par_iter()
                .map(|idx| {
                    ctx.check_cancelled(idx)?;
                    (self.load)(idx).map_err(|e| e.in_partition(idx))
                })
                .collect()
        })
    }

    fn describe(&self) -> String {
        format!("load[{}]({})", self.num_partitions, self.label)
    }
}

struct Narrow<S, T> {
    parent: Arc<dyn Lineage<S>>,
    label: &'static str,
    f: Arc<PartitionFn<S, T>>,
}

impl<S: Element, T: Element> Lineage<T> for Narrow<S, T> {
    fn num_partitions(&self) -> usize {
        self.parent.num_partitions()
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<Vec<Vec<T>>, FrameworkError> {
        let parts = self.parent.compute(ctx)?;
        ctx.install(|| {
            parts
                .into_par_iter()
                .enumerate()
                .map(|(idx, part)| {
                    ctx.check_cancelled(idx)?;
                    (self.f)(idx, part).map_err(|e| e.in_partition(idx))
                })
                .collect()
        })
    }

    fn describe(&self) -> String {
        format!("{}({})", self.label, self.parent.describe())
    }
}

struct Wide<S, T> {
    parent: Arc<dyn Lineage<S>>,
    label: &'static str,
    num_partitions: usize,
    f: Arc<ShuffleFn<S, T>>,
}

impl<S: Element, T: Element> Lineage<T> for Wide<S, T> {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<Vec<Vec<T>>, FrameworkError> {
        let parts = self.parent.compute(ctx)?;
        ctx.check_cancelled(0)?;
        (self.f)(ctx, parts)
    }

    fn describe(&self) -> String {
        format!("{}[{}]({})", self.label, self.num_partitions, self.parent.describe())
    }
}

struct Union<T> {
    left: Arc<dyn Lineage<T>>,
    right: Arc<dyn Lineage<T>>,
}

impl<T: Element> Lineage<T> for Union<T> {
    fn num_partitions(&self) -> usize {
        self.left.num_partitions() + self.right.num_partitions()
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<Vec<Vec<T>>, FrameworkError> {
        let mut parts = self.left.compute(ctx)?;
        parts.extend(self.right.compute(ctx)?);
        Ok(parts)
    }

    fn describe(&self) -> String {
        format!("union({}, {})", self.left.describe(), self.right.describe())
    }
}

/// Immutable, partitioned, lazily evaluated collection.
///
/// Transformations only extend the lineage; nothing runs until an action
/// (`collect`, `partitions`, `count`, `reduce`, `aggregate`, `cache`) is
/// called. Narrow transformations run per partition and keep the order inside
/// each partition. `group_by_key` and `sort_by` redistribute records across
/// partitions and are the only points where partitions exchange data.
///
/// An error returned by any transform fails the whole action; partial output
/// is never returned.
pub struct Collection<T> {
    context: ExecutionContext,
    node: Arc<dyn Lineage<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("partitions", &self.node.num_partitions())
            .field("lineage", &self.node.describe())
            .finish()
    }
}

impl<T: Element> Collection<T> {
    /// Distribute `items` over the context's default partition count, keeping order.
    pub fn from_vec(ctx: &ExecutionContext, items: Vec<T>) -> Self {
        Self::from_partitions(ctx, split_even(items, ctx.default_partitions()))
    }

    /// Wrap pre-partitioned data.
    pub fn from_partitions(ctx: &ExecutionContext, mut partitions: Vec<Vec<T>>) -> Self {
        if partitions.is_empty() {
            partitions.push(Vec::new());
        }
        Self {
            context: ctx.clone(),
            node: Arc::new(Materialized {
                partitions: Arc::new(partitions),
            }),
        }
    }

    /// Collection whose partitions are produced on demand by `load`.
    pub fn from_loader<F>(
        ctx: &ExecutionContext,
        num_partitions: usize,
        label: impl Into<String>,
        load: F,
    ) -> Self
    where
        F: Fn(usize) -> Result<Vec<T>, FrameworkError> + Send + Sync + 'static,
    {
        Self {
            context: ctx.clone(),
            node: Arc::new(Loaded {
                num_partitions: num_partitions.max(1),
                label: label.into(),
                load: Arc::new(load),
            }),
        }
    }

    /// Execution context the collection runs on.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.node.num_partitions()
    }

    /// Human-readable description of the lineage.
    pub fn describe(&self) -> String {
        self.node.describe()
    }

    fn derive<U: Element>(&self, node: Arc<dyn Lineage<U>>) -> Collection<U> {
        Collection {
            context: self.context.clone(),
            node,
        }
    }

    fn narrow<U, F>(&self, label: &'static str, f: F) -> Collection<U>
    where
        U: Element,
        F: Fn(usize, Vec<T>) -> Result<Vec<U>, FrameworkError> + Send + Sync + 'static,
    {
        self.derive(Arc::new(Narrow {
            parent: Arc::clone(&self.node),
            label,
            f: Arc::new(f),
        }))
    }

    fn wide<U, F>(&self, label: &'static str, num_partitions: usize, f: F) -> Collection<U>
    where
        U: Element,
        F: Fn(&ExecutionContext, Vec<Vec<T>>) -> Result<Vec<Vec<U>>, FrameworkError>
            + Send
            + Sync
            + 'static,
    {
        self.derive(Arc::new(Wide {
            parent: Arc::clone(&self.node),
            label,
            num_partitions,
            f: Arc::new(f),
        }))
    }

    /// Apply `f` to every element.
    pub fn map<U, F>(&self, f: F) -> Collection<U>
    where
        U: Element,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.narrow("map", move |_, part| Ok(part.into_iter().map(&f).collect()))
    }

    /// Apply a fallible `f` to every element; the first error fails the action.
    pub fn try_map<U, F>(&self, f: F) -> Collection<U>
    where
        U: Element,
        F: Fn(T) -> Result<U, FrameworkError> + Send + Sync + 'static,
    {
        self.narrow("try_map", move |_, part| part.into_iter().map(&f).collect())
    }

    /// Expand every element into zero or more elements.
    pub fn flat_map<U, I, F>(&self, f: F) -> Collection<U>
    where
        U: Element,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        self.narrow("flat_map", move |_, part| {
            Ok(part.into_iter().flat_map(&f).collect())
        })
    }

    /// Fallible [`flat_map`](Self::flat_map).
    pub fn try_flat_map<U, I, F>(&self, f: F) -> Collection<U>
    where
        U: Element,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> Result<I, FrameworkError> + Send + Sync + 'static,
    {
        self.narrow("try_flat_map", move |_, part| {
            let mut out = Vec::with_capacity(part.len());
            for item in part {
                out.extend(f(item)?);
            }
            Ok(out)
        })
    }

    /// Keep elements matching a pure, deterministic predicate.
    pub fn filter<F>(&self, predicate: F) -> Collection<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.narrow("filter", move |_, part| {
            Ok(part.into_iter().filter(|item| predicate(item)).collect())
        })
    }

    /// Transform whole partitions at once.
    pub fn map_partitions<U, F>(&self, f: F) -> Collection<U>
    where
        U: Element,
        F: Fn(Vec<T>) -> Result<Vec<U>, FrameworkError> + Send + Sync + 'static,
    {
        self.narrow("map_partitions", move |_, part| f(part))
    }

    /// Concatenate the partitions of two collections.
    pub fn union(&self, other: &Collection<T>) -> Collection<T> {
        self.derive(Arc::new(Union {
            left: Arc::clone(&self.node),
            right: Arc::clone(&other.node),
        }))
    }

    /// Group elements by a derived key (shuffle).
    ///
    /// Groups are hash partitioned; there is no order across groups. Inside a
    /// group, values keep the order they had across the parent's partitions,
    /// so a preceding [`sort_by`](Self::sort_by) yields sorted groups.
    pub fn group_by_key<K, F>(&self, key_fn: F) -> Collection<(K, Vec<T>)>
    where
        K: Element + Hash + Eq,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let n = self.num_partitions().max(1);
        self.wide("group_by_key", n, move |ctx, parts| {
            let buckets: Vec<Vec<Vec<(K, T)>>> = ctx.install(|| {
                parts
                    .into_par_iter()
                    .map(|part| {
                        let mut out: Vec<Vec<(K, T)>> = (0..n).map(|_| Vec::new()).collect();
                        for item in part {
                            let key = key_fn(&item);
                            out[bucket_of(&key, n)].push((key, item));
                        }
                        out
                    })
                    .collect()
            });

            let mut per_target: Vec<Vec<Vec<(K, T)>>> =
                (0..n).map(|_| Vec::with_capacity(buckets.len())).collect();
            for source in buckets {
                for (target, chunk) in source.into_iter().enumerate() {
                    per_target[target].push(chunk);
                }
            }

            let grouped = ctx.install(|| {
                per_target
                    .into_par_iter()
                    .map(|chunks| {
                        let mut index: FxHashMap<K, usize> = FxHashMap::default();
                        let mut groups: Vec<(K, Vec<T>)> = Vec::new();
                        for (key, item) in chunks.into_iter().flatten() {
                            match index.get(&key) {
                                Some(&slot) => groups[slot].1.push(item),
                                None => {
                                    index.insert(key.clone(), groups.len());
                                    groups.push((key, vec![item]));
                                }
                            }
                        }
                        groups
                    })
                    .collect()
            });
            Ok(grouped)
        })
    }

    /// Total order over the whole collection (shuffle).
    ///
    /// The result is range partitioned: every element of partition `i` sorts
    /// at or before every element of partition `i + 1`. Equal keys keep their
    /// previous relative order.
    pub fn sort_by<K, F>(&self, key_fn: F, ascending: bool) -> Collection<T>
    where
        K: Ord + Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let n = self.num_partitions().max(1);
        self.wide("sort_by", n, move |ctx, parts| {
            let sorted = ctx.install(|| {
                let keyed: Vec<Vec<(K, T)>> = parts
                    .into_par_iter()
                    .map(|part| {
                        part.into_iter()
                            .map(|item| (key_fn(&item), item))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                let mut keyed: Vec<(K, T)> = keyed.into_iter().flatten().collect();
                if ascending {
                    keyed.par_sort_by(|a, b| a.0.cmp(&b.0));
                } else {
                    keyed.par_sort_by(|a, b| b.0.cmp(&a.0));
                }
                keyed.into_iter().map(|(_, item)| item).collect::<Vec<T>>()
            });
            Ok(split_even(sorted, n))
        })
    }

    /// Redistribute into `num_partitions` contiguous partitions, keeping global order.
    pub fn repartition(&self, num_partitions: usize) -> Collection<T> {
        let n = num_partitions.max(1);
        self.wide("repartition", n, move |_, parts| {
            Ok(split_even(parts.into_iter().flatten().collect(), n))
        })
    }

    /// Execute the lineage and return every partition.
    pub fn partitions(&self) -> Result<Vec<Vec<T>>, FrameworkError> {
        self.node.compute(&self.context)
    }

    /// Execute and concatenate partitions in order.
    pub fn collect(&self) -> Result<Vec<T>, FrameworkError> {
        Ok(self.partitions()?.into_iter().flatten().collect())
    }

    /// Number of elements.
    pub fn count(&self) -> Result<usize, FrameworkError> {
        Ok(self.partitions()?.iter().map(Vec::len).sum())
    }

    /// Execute once and keep the result, so later actions do not recompute.
    pub fn cache(&self) -> Result<Collection<T>, FrameworkError> {
        let parts = self.partitions()?;
        Ok(Collection::from_partitions(&self.context, parts))
    }

    /// Combine all elements with an associative `f`.
    pub fn reduce<F>(&self, f: F) -> Result<Option<T>, FrameworkError>
    where
        F: Fn(T, T) -> T + Send + Sync,
    {
        let parts = self.partitions()?;
        let partials: Vec<Option<T>> = self.context.install(|| {
            parts
                .into_par_iter()
                .map(|part| part.into_iter().reduce(&f))
                .collect()
        });
        Ok(partials.into_iter().flatten().reduce(&f))
    }

    /// Fold each partition from `zero` with `seq`, then merge partials with `comb`.
    pub fn aggregate<A, S, C>(&self, zero: A, seq: S, comb: C) -> Result<A, FrameworkError>
    where
        A: Clone + Send + Sync,
        S: Fn(A, &T) -> A + Send + Sync,
        C: Fn(A, A) -> A + Send + Sync,
    {
        let parts = self.partitions()?;
        let partials: Vec<A> = self.context.install(|| {
            parts
                .par_iter()
                .map(|part| part.iter().fold(zero.clone(), &seq))
                .collect()
        });
        Ok(partials.into_iter().fold(zero, comb))
    }
}

impl<K, V> Collection<(K, V)>
where
    K: Element + Hash + Eq,
    V: Element,
{
    /// Merge values sharing a key with an associative, commutative `f`.
    ///
    /// Values are combined inside each partition before the shuffle.
    pub fn reduce_by_key<F>(&self, f: F) -> Collection<(K, V)>
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        let combine = Arc::new(f);
        let local = Arc::clone(&combine);

        self.map_partitions(move |part| {
            let mut order: Vec<K> = Vec::new();
            let mut acc: FxHashMap<K, V> = FxHashMap::default();
            for (key, value) in part {
                match acc.remove(&key) {
                    Some(prev) => {
                        acc.insert(key, (*local)(prev, value));
                    }
                    None => {
                        order.push(key.clone());
                        acc.insert(key, value);
                    }
                }
            }
            Ok(order
                .into_iter()
                .filter_map(|key| acc.remove(&key).map(|value| (key, value)))
                .collect())
        })
        .group_by_key(|(key, _)| key.clone())
        .flat_map(move |(key, values)| {
            values
                .into_iter()
                .map(|(_, value)| value)
                .reduce(|a, b| (*combine)(a, b))
                .map(|value| (key, value))
        })
    }
}

fn bucket_of<K: Hash>(key: &K, n: usize) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() % n as u64) as usize
}

/// Split `items` into exactly `n` contiguous, near-equal partitions.
fn split_even<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    let base = items.len() / n;
    let extra = items.len() % n;
    let mut parts = Vec::with_capacity(n);
    let mut iter = items.into_iter();
    for idx in 0..n {
        let take = base + usize::from(idx < extra);
        parts.push(iter.by_ref().take(take).collect());
    }
    parts
}
