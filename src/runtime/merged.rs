//! Compile-time block fusion
//!
//! [`Merged`] composes two statically-typed per-sample blocks into one unit:
//! the left block's `OUT_ID`-th output feeds the right block's `IN_ID`-th
//! input directly, with no intermediate buffer and no dynamic dispatch. The
//! fusion itself is the connection: a fused pair has no edge in any graph,
//! cannot be re-sized and cannot be unfused. A value-type mismatch at the
//! fused pair is a build-time failure (the tuple plumbing bounds do not
//! hold), never an edge state.
//!
//! This deliberately coexists with the runtime edge mechanism instead of
//! hiding behind the same interface: one path optimizes for flexibility, the
//! other for raw throughput.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::block::{Block, short_type_name};
use super::ports::PortDecl;

/// Fixed-arity tuple of stream values flowing through a per-sample transform.
pub trait Tuple {
    const ARITY: usize;
}

impl Tuple for () {
    const ARITY: usize = 0;
}

macro_rules! impl_tuple_arity {
    ($n:literal, $($t:ident),+) => {
        impl<$($t),+> Tuple for ($($t,)+) {
            const ARITY: usize = $n;
        }
    };
}

impl_tuple_arity!(1, T0);
impl_tuple_arity!(2, T0, T1);
impl_tuple_arity!(3, T0, T1, T2);
impl_tuple_arity!(4, T0, T1, T2, T3);

/// Removes the value at index `I`, yielding it plus the remaining tuple.
pub trait PluckAt<const I: usize>: Tuple {
    type Value;
    type Rest: Tuple;
    fn pluck_at(self) -> (Self::Value, Self::Rest);
}

macro_rules! impl_pluck_at {
    ($idx:literal; ($($before:ident),*); ($($after:ident),*)) => {
        impl<$($before,)* V, $($after),*> PluckAt<$idx> for ($($before,)* V, $($after,)*) {
            type Value = V;
            type Rest = ($($before,)* $($after,)*);
            #[allow(non_snake_case)]
            fn pluck_at(self) -> (Self::Value, Self::Rest) {
                let ($($before,)* value, $($after,)*) = self;
                (value, ($($before,)* $($after,)*))
            }
        }
    };
}

impl_pluck_at!(0; (); ());
impl_pluck_at!(0; (); (A1));
impl_pluck_at!(1; (A0); ());
impl_pluck_at!(0; (); (A1, A2));
impl_pluck_at!(1; (A0); (A2));
impl_pluck_at!(2; (A0, A1); ());

/// Rebuilds `Self` by inserting `value` at index `I` between the remaining
/// values. The trait resolves only when the value type at position `I`
/// matches, which is what makes a fused-pair type mismatch a compile error.
pub trait InsertAt<const I: usize, V>: Tuple {
    type Rest: Tuple;
    fn insert_at(rest: Self::Rest, value: V) -> Self;
}

macro_rules! impl_insert_at {
    ($idx:literal; ($($before:ident),*); ($($after:ident),*)) => {
        impl<$($before,)* V, $($after),*> InsertAt<$idx, V> for ($($before,)* V, $($after,)*) {
            type Rest = ($($before,)* $($after,)*);
            #[allow(non_snake_case)]
            fn insert_at(rest: Self::Rest, value: V) -> Self {
                let ($($before,)* $($after,)*) = rest;
                ($($before,)* value, $($after,)*)
            }
        }
    };
}

impl_insert_at!(0; (); ());
impl_insert_at!(0; (); (A1));
impl_insert_at!(1; (A0); ());
impl_insert_at!(0; (); (A1, A2));
impl_insert_at!(1; (A0); (A2));
impl_insert_at!(2; (A0, A1); ());

/// Concatenates two tuples, preserving order.
pub trait Concat<Rhs: Tuple>: Tuple {
    type Output: Tuple;
    fn concat(self, rhs: Rhs) -> Self::Output;
}

macro_rules! impl_concat {
    (($($a:ident),*); ($($b:ident),*)) => {
        impl<$($a,)* $($b),*> Concat<($($b,)*)> for ($($a,)*) {
            type Output = ($($a,)* $($b,)*);
            #[allow(non_snake_case)]
            fn concat(self, rhs: ($($b,)*)) -> Self::Output {
                let ($($a,)*) = self;
                let ($($b,)*) = rhs;
                ($($a,)* $($b,)*)
            }
        }
    };
}

impl_concat!((); ());
impl_concat!((); (B0));
impl_concat!((); (B0, B1));
impl_concat!((); (B0, B1, B2));
impl_concat!((); (B0, B1, B2, B3));
impl_concat!((A0); ());
impl_concat!((A0); (B0));
impl_concat!((A0); (B0, B1));
impl_concat!((A0); (B0, B1, B2));
impl_concat!((A0, A1); ());
impl_concat!((A0, A1); (B0));
impl_concat!((A0, A1); (B0, B1));
impl_concat!((A0, A1, A2); ());
impl_concat!((A0, A1, A2); (B0));
impl_concat!((A0, A1, A2, A3); ());

/// Splits a tuple into a `Front`/`Back` pair at a type-determined position.
pub trait SplitTo<Front: Tuple, Back: Tuple>: Tuple {
    fn split_to(self) -> (Front, Back);
}

macro_rules! impl_split_to {
    (($($f:ident),*); ($($b:ident),*)) => {
        impl<$($f,)* $($b),*> SplitTo<($($f,)*), ($($b,)*)> for ($($f,)* $($b,)*) {
            #[allow(non_snake_case)]
            fn split_to(self) -> (($($f,)*), ($($b,)*)) {
                let ($($f,)* $($b,)*) = self;
                (($($f,)*), ($($b,)*))
            }
        }
    };
}

impl_split_to!((); ());
impl_split_to!((); (B0));
impl_split_to!((); (B0, B1));
impl_split_to!((); (B0, B1, B2));
impl_split_to!((); (B0, B1, B2, B3));
impl_split_to!((F0); ());
impl_split_to!((F0); (B0));
impl_split_to!((F0); (B0, B1));
impl_split_to!((F0); (B0, B1, B2));
impl_split_to!((F0, F1); ());
impl_split_to!((F0, F1); (B0));
impl_split_to!((F0, F1); (B0, B1));
impl_split_to!((F0, F1, F2); ());
impl_split_to!((F0, F1, F2); (B0));
impl_split_to!((F0, F1, F2, F3); ());

/// Per-sample transform over a tuple of inputs.
///
/// This is the primitive the fusion path composes; how a block implements it
/// internally (state machines, filters, table lookups) is its own business.
pub trait ProcessOne {
    type Inputs: Tuple;
    type Outputs: Tuple;
    fn process_one(&mut self, inputs: Self::Inputs) -> Self::Outputs;
}

/// Vectorized (batched) evaluation. A block claims the batched path only by
/// implementing this; [`Merged`] claims it only when both halves do, and the
/// composite keeps each half's batch width contract (`outputs.len()` grows by
/// exactly `inputs.len()`).
pub trait ProcessBulk: ProcessOne {
    fn process_bulk(&mut self, inputs: &[Self::Inputs], outputs: &mut Vec<Self::Outputs>);
}

/// Value type produced at the fused output port.
pub type FusedValue<A, const OUT_ID: usize> = <<A as ProcessOne>::Outputs as PluckAt<OUT_ID>>::Value;

/// The right block's inputs that stay externally visible after fusion.
pub type ExternalRightInputs<A, B, const OUT_ID: usize, const IN_ID: usize> =
    <<B as ProcessOne>::Inputs as InsertAt<IN_ID, FusedValue<A, OUT_ID>>>::Rest;

/// Which constituent an external port of a [`Merged`] block dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    Left,
    Right,
}

static MERGED_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Compile-time composition of two blocks into one fused processing unit.
///
/// Holds both constituents by value; the external port set is the
/// concatenation of the left block's ports (minus the fused output) and the
/// right block's ports (minus the fused input), left side first. Immutable
/// topology once built.
pub struct Merged<A, B, const OUT_ID: usize, const IN_ID: usize> {
    left: A,
    right: B,
    name: String,
    unique_name: String,
}

impl<A, B, const OUT_ID: usize, const IN_ID: usize> Merged<A, B, OUT_ID, IN_ID> {
    pub fn left(&self) -> &A {
        &self.left
    }

    pub fn left_mut(&mut self) -> &mut A {
        &mut self.left
    }

    pub fn right(&self) -> &B {
        &self.right
    }

    pub fn right_mut(&mut self) -> &mut B {
        &mut self.right
    }

    /// Process-wide unique name of this fused unit.
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }
}

/// Fuse `left`'s `OUT_ID`-th output into `right`'s `IN_ID`-th input.
///
/// The port value types must match exactly; a mismatch fails to compile
/// because the `InsertAt` bound cannot be satisfied.
pub fn merge_by_index<const OUT_ID: usize, const IN_ID: usize, A, B>(left: A, right: B) -> Merged<A, B, OUT_ID, IN_ID>
where
    A: ProcessOne,
    B: ProcessOne,
    A::Outputs: PluckAt<OUT_ID>,
    B::Inputs: InsertAt<IN_ID, FusedValue<A, OUT_ID>>,
{
    let id = MERGED_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let unique_name = format!(
        "merged({}:{}, {}:{})#{}",
        short_type_name(std::any::type_name::<A>()),
        OUT_ID,
        short_type_name(std::any::type_name::<B>()),
        IN_ID,
        id
    );
    Merged {
        left,
        right,
        name: "merged".to_string(),
        unique_name,
    }
}

impl<A, B, const OUT_ID: usize, const IN_ID: usize> ProcessOne for Merged<A, B, OUT_ID, IN_ID>
where
    A: ProcessOne,
    B: ProcessOne,
    A::Outputs: PluckAt<OUT_ID>,
    B::Inputs: InsertAt<IN_ID, FusedValue<A, OUT_ID>>,
    A::Inputs: Concat<ExternalRightInputs<A, B, OUT_ID, IN_ID>>,
    <A::Inputs as Concat<ExternalRightInputs<A, B, OUT_ID, IN_ID>>>::Output:
        SplitTo<A::Inputs, ExternalRightInputs<A, B, OUT_ID, IN_ID>>,
    <A::Outputs as PluckAt<OUT_ID>>::Rest: Concat<B::Outputs>,
{
    type Inputs = <A::Inputs as Concat<ExternalRightInputs<A, B, OUT_ID, IN_ID>>>::Output;
    type Outputs = <<A::Outputs as PluckAt<OUT_ID>>::Rest as Concat<B::Outputs>>::Output;

    fn process_one(&mut self, inputs: Self::Inputs) -> Self::Outputs {
        let (left_in, right_rest) =
            <Self::Inputs as SplitTo<A::Inputs, ExternalRightInputs<A, B, OUT_ID, IN_ID>>>::split_to(inputs);
        let (fused, left_rest) = <A::Outputs as PluckAt<OUT_ID>>::pluck_at(self.left.process_one(left_in));
        let right_out = self
            .right
            .process_one(<B::Inputs as InsertAt<IN_ID, _>>::insert_at(right_rest, fused));
        <<A::Outputs as PluckAt<OUT_ID>>::Rest as Concat<B::Outputs>>::concat(left_rest, right_out)
    }
}

impl<A, B, const OUT_ID: usize, const IN_ID: usize> ProcessBulk for Merged<A, B, OUT_ID, IN_ID>
where
    A: ProcessBulk,
    B: ProcessBulk,
    A::Outputs: PluckAt<OUT_ID>,
    B::Inputs: InsertAt<IN_ID, FusedValue<A, OUT_ID>>,
    A::Inputs: Concat<ExternalRightInputs<A, B, OUT_ID, IN_ID>>,
    <A::Inputs as Concat<ExternalRightInputs<A, B, OUT_ID, IN_ID>>>::Output:
        SplitTo<A::Inputs, ExternalRightInputs<A, B, OUT_ID, IN_ID>> + Clone,
    <A::Outputs as PluckAt<OUT_ID>>::Rest: Concat<B::Outputs>,
{
    fn process_bulk(&mut self, inputs: &[Self::Inputs], outputs: &mut Vec<Self::Outputs>) {
        let mut left_inputs = Vec::with_capacity(inputs.len());
        let mut right_rests = Vec::with_capacity(inputs.len());
        for sample in inputs.iter().cloned() {
            let (left_in, right_rest) =
                <Self::Inputs as SplitTo<A::Inputs, ExternalRightInputs<A, B, OUT_ID, IN_ID>>>::split_to(sample);
            left_inputs.push(left_in);
            right_rests.push(right_rest);
        }

        let mut left_outputs = Vec::with_capacity(inputs.len());
        self.left.process_bulk(&left_inputs, &mut left_outputs);
        debug_assert_eq!(left_outputs.len(), inputs.len(), "left half broke the batch width contract");

        let mut right_inputs = Vec::with_capacity(inputs.len());
        let mut left_rests = Vec::with_capacity(inputs.len());
        for (out, rest) in left_outputs.into_iter().zip(right_rests) {
            let (fused, left_rest) = <A::Outputs as PluckAt<OUT_ID>>::pluck_at(out);
            left_rests.push(left_rest);
            right_inputs.push(<B::Inputs as InsertAt<IN_ID, _>>::insert_at(rest, fused));
        }

        let mut right_outputs = Vec::with_capacity(inputs.len());
        self.right.process_bulk(&right_inputs, &mut right_outputs);
        debug_assert_eq!(right_outputs.len(), inputs.len(), "right half broke the batch width contract");

        for (left_rest, right_out) in left_rests.into_iter().zip(right_outputs) {
            outputs.push(<<A::Outputs as PluckAt<OUT_ID>>::Rest as Concat<B::Outputs>>::concat(left_rest, right_out));
        }
    }
}

impl<A, B, const OUT_ID: usize, const IN_ID: usize> Merged<A, B, OUT_ID, IN_ID>
where
    A: Block,
    B: Block,
{
    /// Which constituent the external input port at `index` belongs to.
    pub fn input_port_side(&self, index: usize) -> PortSide {
        if index < self.left.input_ports().len() {
            PortSide::Left
        } else {
            PortSide::Right
        }
    }

    /// Which constituent the external output port at `index` belongs to.
    pub fn output_port_side(&self, index: usize) -> PortSide {
        if index < self.left.output_ports().len().saturating_sub(1) {
            PortSide::Left
        } else {
            PortSide::Right
        }
    }
}

impl<A, B, const OUT_ID: usize, const IN_ID: usize> Block for Merged<A, B, OUT_ID, IN_ID>
where
    A: Block,
    B: Block,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        let mut ports = self.left.input_ports();
        let mut right = self.right.input_ports();
        if IN_ID < right.len() {
            right.remove(IN_ID);
        }
        ports.extend(right);
        ports
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        let mut ports = self.left.output_ports();
        if OUT_ID < ports.len() {
            ports.remove(OUT_ID);
        }
        ports.extend(self.right.output_ports());
        ports
    }

    fn init(
        &mut self,
        progress: &std::sync::Arc<super::block::Progress>,
        context: &super::block::ComputeContext,
    ) {
        self.left.init(progress, context);
        self.right.init(progress, context);
    }

    fn start(&mut self) {
        self.left.start();
        self.right.start();
    }

    fn stop(&mut self) {
        self.left.stop();
        self.right.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ports::PortInfo;

    struct ScaleK {
        factor: f32,
    }

    impl ProcessOne for ScaleK {
        type Inputs = (f32,);
        type Outputs = (f32,);
        fn process_one(&mut self, (x,): (f32,)) -> (f32,) {
            (x * self.factor,)
        }
    }

    impl ProcessBulk for ScaleK {
        fn process_bulk(&mut self, inputs: &[(f32,)], outputs: &mut Vec<(f32,)>) {
            outputs.extend(inputs.iter().map(|(x,)| (x * self.factor,)));
        }
    }

    impl Block for ScaleK {
        fn name(&self) -> &str {
            "scale"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_input::<f32>("original"))]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_output::<f32>("scaled"))]
        }
    }

    struct AddK;

    impl ProcessOne for AddK {
        type Inputs = (f32, f32);
        type Outputs = (f32,);
        fn process_one(&mut self, (a, b): (f32, f32)) -> (f32,) {
            (a + b,)
        }
    }

    impl ProcessBulk for AddK {
        fn process_bulk(&mut self, inputs: &[(f32, f32)], outputs: &mut Vec<(f32,)>) {
            outputs.extend(inputs.iter().map(|(a, b)| (a + b,)));
        }
    }

    impl Block for AddK {
        fn name(&self) -> &str {
            "adder"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![
                PortDecl::Single(PortInfo::stream_input::<f32>("addend0")),
                PortDecl::Single(PortInfo::stream_input::<f32>("addend1")),
            ]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_output::<f32>("sum"))]
        }
    }

    struct DupK;

    impl ProcessOne for DupK {
        type Inputs = (f32,);
        type Outputs = (f32, f32);
        fn process_one(&mut self, (x,): (f32,)) -> (f32, f32) {
            (x, x)
        }
    }

    #[test]
    fn fused_chain_matches_sequential_evaluation() {
        let mut fused = merge_by_index::<0, 0, _, _>(ScaleK { factor: 2.0 }, ScaleK { factor: -1.0 });
        let mut a = ScaleK { factor: 2.0 };
        let mut b = ScaleK { factor: -1.0 };

        for i in 0..64 {
            let x = i as f32 * 0.5;
            let unfused = b.process_one(a.process_one((x,)));
            assert_eq!(fused.process_one((x,)), unfused);
        }
    }

    #[test]
    fn fusion_into_a_multi_input_block_substitutes_at_the_right_index() {
        // adder(scale(x), y)
        let mut fused = merge_by_index::<0, 0, _, _>(ScaleK { factor: 3.0 }, AddK);
        assert_eq!(fused.process_one((2.0, 10.0)), (16.0,));

        // adder(y, scale(x))
        let mut fused = merge_by_index::<0, 1, _, _>(ScaleK { factor: 3.0 }, AddK);
        assert_eq!(fused.process_one((2.0, 10.0)), (16.0,));
    }

    #[test]
    fn unfused_left_outputs_are_kept_in_order() {
        // duplicate x, fuse the second copy into a scaler; the first copy
        // stays visible ahead of the right block's outputs
        let mut fused = merge_by_index::<1, 0, _, _>(DupK, ScaleK { factor: 3.0 });
        assert_eq!(fused.process_one((2.0,)), (2.0, 6.0));
    }

    #[test]
    fn nested_fusion_composes() {
        let inner = merge_by_index::<0, 0, _, _>(ScaleK { factor: 2.0 }, ScaleK { factor: 5.0 });
        let mut outer = merge_by_index::<0, 0, _, _>(inner, ScaleK { factor: 0.5 });
        assert_eq!(outer.process_one((3.0,)), (15.0,));
    }

    #[test]
    fn bulk_path_matches_per_sample_path() {
        let mut fused = merge_by_index::<0, 0, _, _>(ScaleK { factor: 2.0 }, AddK);
        let inputs: Vec<(f32, f32)> = (0..32).map(|i| (i as f32, 100.0)).collect();

        let mut bulk = Vec::new();
        fused.process_bulk(&inputs, &mut bulk);
        assert_eq!(bulk.len(), inputs.len());

        for (input, output) in inputs.iter().zip(&bulk) {
            assert_eq!(*output, fused.process_one(*input));
        }
    }

    #[test]
    fn merged_port_surface_drops_the_fused_pair() {
        let fused = merge_by_index::<0, 0, _, _>(ScaleK { factor: 2.0 }, AddK);

        let inputs: Vec<String> = fused.input_ports().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(inputs, vec!["original", "addend1"]);

        let outputs: Vec<String> = fused.output_ports().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(outputs, vec!["sum"]);

        assert_eq!(fused.input_port_side(0), PortSide::Left);
        assert_eq!(fused.input_port_side(1), PortSide::Right);
        assert_eq!(fused.output_port_side(0), PortSide::Right);
    }

    #[test]
    fn merged_unique_names_are_distinct() {
        let a = merge_by_index::<0, 0, _, _>(ScaleK { factor: 1.0 }, ScaleK { factor: 1.0 });
        let b = merge_by_index::<0, 0, _, _>(ScaleK { factor: 1.0 }, ScaleK { factor: 1.0 });
        assert_ne!(a.unique_name(), b.unique_name());
        assert!(a.unique_name().starts_with("merged(ScaleK:0, ScaleK:0)#"));
    }
}
