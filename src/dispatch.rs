//! Fan-out of one logical call into an ordered sequence of per-channel
//! exchanges.
//!
//! A channel argument and a value argument may each be absent, a single
//! value, or a list. The resolver turns every meaningful combination into
//! an explicit (channel, value) plan, validated in full before the first
//! exchange, and executes it strictly in order.

use crate::channel::ChannelRegistry;
use crate::client::Reply;
use crate::error::TesError;

/// An argument that is absent, a single value, or an ordered list.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Selector<T> {
    /// Nothing given. For channels this means "every channel".
    #[default]
    Unset,
    One(T),
    Many(Vec<T>),
}

impl<T> Selector<T> {
    /// Alias for [`Selector::Unset`] that reads better at call sites
    /// addressing every channel.
    pub const fn all() -> Self {
        Selector::Unset
    }
}

impl<T> From<T> for Selector<T> {
    fn from(value: T) -> Self {
        Selector::One(value)
    }
}

impl<T> From<Vec<T>> for Selector<T> {
    fn from(values: Vec<T>) -> Self {
        Selector::Many(values)
    }
}

impl<T: Clone> From<&[T]> for Selector<T> {
    fn from(values: &[T]) -> Self {
        Selector::Many(values.to_vec())
    }
}

impl<T, const N: usize> From<[T; N]> for Selector<T> {
    fn from(values: [T; N]) -> Self {
        Selector::Many(values.into())
    }
}

/// Replies from one dispatched call, shaped like the channel argument: a
/// bare index yields `One`, everything else an ordered `Many` aligned with
/// the resolved (channel, value) pairs.
#[derive(Debug, Clone)]
pub enum Fanout<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Fanout<T> {
    pub fn len(&self) -> usize {
        match self {
            Fanout::One(_) => 1,
            Fanout::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single reply of a one-channel call, if that is what this is.
    pub fn into_one(self) -> Option<T> {
        match self {
            Fanout::One(item) => Some(item),
            Fanout::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Fanout::One(item) => vec![item],
            Fanout::Many(items) => items,
        }
    }
}

impl ChannelRegistry {
    /// Resolve a channel argument on its own, for operations that carry no
    /// value: unset means every channel, in index order.
    pub fn resolve_channels(&self, channels: &Selector<usize>) -> Result<Vec<usize>, TesError> {
        let picked = match channels {
            Selector::Unset => (1..=self.count()).collect(),
            Selector::One(channel) => vec![*channel],
            Selector::Many(list) => list.clone(),
        };
        for channel in &picked {
            self.for_channel(*channel)?;
        }
        Ok(picked)
    }

    /// Resolve a (channel, value) argument pair into an ordered plan.
    ///
    /// First match wins, no fallthrough:
    /// one channel + one value; all channels + one value (broadcast); all
    /// channels + a count-sized list; a channel list + one value; two
    /// equal-length lists zipped positionally. Anything else fails before
    /// any I/O, as do channel indices outside the registry.
    pub fn resolve_pairs<T: Clone>(
        &self,
        channels: &Selector<usize>,
        values: &Selector<T>,
    ) -> Result<Vec<(usize, T)>, TesError> {
        let pairs: Vec<(usize, T)> = match (channels, values) {
            (_, Selector::Unset) => {
                return Err(TesError::MissingArgument(
                    "this operation requires a value",
                ))
            }
            (Selector::One(channel), Selector::One(value)) => vec![(*channel, value.clone())],
            (Selector::One(_), Selector::Many(_)) => {
                return Err(TesError::MissingArgument(
                    "a single channel takes a single value, not a list",
                ))
            }
            (Selector::Unset, Selector::One(value)) => {
                (1..=self.count()).map(|ch| (ch, value.clone())).collect()
            }
            (Selector::Unset, Selector::Many(values)) => {
                if values.len() != self.count() {
                    return Err(TesError::ShapeMismatch {
                        channels: self.count(),
                        values: values.len(),
                    });
                }
                (1..=self.count()).zip(values.iter().cloned()).collect()
            }
            (Selector::Many(list), Selector::One(value)) => {
                list.iter().map(|ch| (*ch, value.clone())).collect()
            }
            (Selector::Many(list), Selector::Many(values)) => {
                if list.len() != values.len() {
                    return Err(TesError::ShapeMismatch {
                        channels: list.len(),
                        values: values.len(),
                    });
                }
                list.iter().copied().zip(values.iter().cloned()).collect()
            }
        };
        for (channel, _) in &pairs {
            self.for_channel(*channel)?;
        }
        Ok(pairs)
    }

    /// Resolve, build every command, then execute the plan in order.
    ///
    /// `build` runs for every pair before the first exchange, so a bad
    /// argument can never leave a fan-out half-executed. Any exchange
    /// failure aborts the remaining pairs and discards earlier replies.
    pub fn dispatch<T, B>(
        &self,
        channels: Selector<usize>,
        values: Selector<T>,
        build: B,
    ) -> Result<Fanout<Reply>, TesError>
    where
        T: Clone,
        B: Fn(usize, &T) -> Result<String, TesError>,
    {
        let single = matches!(channels, Selector::One(_));
        let pairs = self.resolve_pairs(&channels, &values)?;
        let mut plan = Vec::with_capacity(pairs.len());
        for (channel, value) in &pairs {
            plan.push((*channel, build(*channel, value)?));
        }
        self.execute(plan, single)
    }

    /// Like [`ChannelRegistry::dispatch`] for operations with no value.
    pub fn dispatch_action<B>(
        &self,
        channels: Selector<usize>,
        build: B,
    ) -> Result<Fanout<Reply>, TesError>
    where
        B: Fn(usize) -> String,
    {
        let single = matches!(channels, Selector::One(_));
        let plan = self
            .resolve_channels(&channels)?
            .into_iter()
            .map(|channel| (channel, build(channel)))
            .collect();
        self.execute(plan, single)
    }

    fn execute(&self, plan: Vec<(usize, String)>, single: bool) -> Result<Fanout<Reply>, TesError> {
        let mut replies = Vec::with_capacity(plan.len());
        for (channel, command) in plan {
            replies.push(self.for_channel(channel)?.execute(&command)?);
        }
        if single && replies.len() == 1 {
            Ok(Fanout::One(replies.remove(0)))
        } else {
            Ok(Fanout::Many(replies))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::connection::MockConnection;

    fn registry(count: usize) -> ChannelRegistry {
        let client = Client::new(Box::new(MockConnection::new()));
        ChannelRegistry::new(&client, count)
    }

    #[test]
    fn broadcast_expands_to_every_channel_in_order() {
        for count in 1..=8 {
            let pairs = registry(count)
                .resolve_pairs(&Selector::Unset, &Selector::One(2.5))
                .unwrap();
            let expected: Vec<_> = (1..=count).map(|ch| (ch, 2.5)).collect();
            assert_eq!(pairs, expected);
        }
    }

    #[test]
    fn equal_length_lists_zip_positionally() {
        let pairs = registry(6)
            .resolve_pairs(
                &Selector::Many(vec![5, 1, 3]),
                &Selector::Many(vec![0.5, 1.0, 1.5]),
            )
            .unwrap();
        assert_eq!(pairs, vec![(5, 0.5), (1, 1.0), (3, 1.5)]);
    }

    #[test]
    fn channel_list_broadcasts_a_single_value() {
        let pairs = registry(6)
            .resolve_pairs(&Selector::Many(vec![2, 2, 4]), &Selector::One(7u32))
            .unwrap();
        assert_eq!(pairs, vec![(2, 7), (2, 7), (4, 7)]);
    }

    #[test]
    fn count_sized_value_list_maps_onto_all_channels() {
        let pairs = registry(3)
            .resolve_pairs(&Selector::Unset, &Selector::Many(vec![10, 20, 30]))
            .unwrap();
        assert_eq!(pairs, vec![(1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn wrong_length_value_list_is_a_shape_mismatch() {
        match registry(6).resolve_pairs(&Selector::Unset, &Selector::Many(vec![1.0, 2.0])) {
            Err(TesError::ShapeMismatch { channels, values }) => {
                assert_eq!((channels, values), (6, 2));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match registry(6).resolve_pairs(
            &Selector::Many(vec![1, 2, 3]),
            &Selector::Many(vec![1.0]),
        ) {
            Err(TesError::ShapeMismatch { channels, values }) => {
                assert_eq!((channels, values), (3, 1));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unset_value_is_a_missing_argument() {
        match registry(6).resolve_pairs::<f64>(&Selector::One(1), &Selector::Unset) {
            Err(TesError::MissingArgument(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn single_channel_with_a_value_list_is_rejected() {
        match registry(6).resolve_pairs(&Selector::One(1), &Selector::Many(vec![1.0, 2.0])) {
            Err(TesError::MissingArgument(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn every_resolved_index_is_bounds_checked() {
        match registry(4).resolve_pairs(&Selector::Many(vec![1, 9]), &Selector::One(1.0)) {
            Err(TesError::OutOfRange { index: 9, count: 4 }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        match registry(4).resolve_channels(&Selector::Many(vec![0])) {
            Err(TesError::OutOfRange { index: 0, count: 4 }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn channel_only_resolution_covers_all_three_shapes() {
        let registry = registry(3);
        assert_eq!(
            registry.resolve_channels(&Selector::Unset).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(registry.resolve_channels(&Selector::One(2)).unwrap(), vec![2]);
        assert_eq!(
            registry.resolve_channels(&Selector::Many(vec![3, 1])).unwrap(),
            vec![3, 1]
        );
    }

    #[test]
    fn empty_channel_list_resolves_to_nothing() {
        let registry = registry(3);
        assert!(registry
            .resolve_channels(&Selector::Many(Vec::new()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn selector_conversions_cover_the_call_site_shapes() {
        assert_eq!(Selector::from(3usize), Selector::One(3));
        assert_eq!(Selector::from(vec![1usize, 2]), Selector::Many(vec![1, 2]));
        assert_eq!(Selector::from([1usize, 2]), Selector::Many(vec![1, 2]));
        assert_eq!(Selector::<usize>::all(), Selector::Unset);
    }
}
