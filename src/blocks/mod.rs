//! Basic processing blocks
//!
//! Small building blocks exercising the block construction contract: vector
//! source/sink for tests, a pass-through, and the scale/adder arithmetic
//! pair. The stateless math blocks also expose per-sample kernels, so they
//! can be fused with [`merge_by_index`](crate::runtime::merged::merge_by_index)
//! as well as wired into a graph.

use std::marker::PhantomData;
use std::ops::{Add, Mul};

use crate::runtime::block::{Block, PropertyMap};
use crate::runtime::errors::WorkResult;
use crate::runtime::merged::{ProcessBulk, ProcessOne};
use crate::runtime::ports::{PortDecl, PortEntry, PortInfo};
use crate::runtime::registry::BlockRegistry;
use crate::runtime::sample::Sample;

/// Emits a fixed vector of samples, then idles.
pub struct VectorSource<T: Sample> {
    data: Vec<T>,
    position: usize,
}

impl<T: Sample> VectorSource<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data, position: 0 }
    }

    /// Samples not yet emitted.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl<T: Sample> Block for VectorSource<T> {
    fn name(&self) -> &str {
        "vector_source"
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_output::<T>("out"))]
    }

    fn work(&mut self, _inputs: &[PortEntry], outputs: &[PortEntry]) -> WorkResult<usize> {
        let Some(writer) = outputs.first().and_then(|e| e.as_port()).and_then(|p| p.writer::<T>()) else {
            return Ok(0);
        };
        let mut produced = 0;
        while self.position < self.data.len() {
            if writer.try_send(self.data[self.position].clone()).is_err() {
                break;
            }
            self.position += 1;
            produced += 1;
        }
        Ok(produced)
    }
}

/// Collects every received sample for later inspection.
pub struct VectorSink<T: Sample> {
    received: Vec<T>,
}

impl<T: Sample> VectorSink<T> {
    pub fn new() -> Self {
        Self { received: Vec::new() }
    }

    pub fn received(&self) -> &[T] {
        &self.received
    }
}

impl<T: Sample> Default for VectorSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample> Block for VectorSink<T> {
    fn name(&self) -> &str {
        "vector_sink"
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_input::<T>("in"))]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![]
    }

    fn work(&mut self, inputs: &[PortEntry], _outputs: &[PortEntry]) -> WorkResult<usize> {
        let Some(reader) = inputs.first().and_then(|e| e.as_port()).and_then(|p| p.reader::<T>()) else {
            return Ok(0);
        };
        let mut consumed = 0;
        while let Ok(value) = reader.try_recv() {
            self.received.push(value);
            consumed += 1;
        }
        Ok(consumed)
    }
}

/// Consumes and discards everything.
pub struct NullSink<T: Sample> {
    consumed: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Sample> NullSink<T> {
    pub fn new() -> Self {
        Self { consumed: 0, _marker: PhantomData }
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl<T: Sample> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample> Block for NullSink<T> {
    fn name(&self) -> &str {
        "null_sink"
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_input::<T>("in"))]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![]
    }

    fn work(&mut self, inputs: &[PortEntry], _outputs: &[PortEntry]) -> WorkResult<usize> {
        let Some(reader) = inputs.first().and_then(|e| e.as_port()).and_then(|p| p.reader::<T>()) else {
            return Ok(0);
        };
        let mut consumed = 0;
        while reader.try_recv().is_ok() {
            consumed += 1;
        }
        self.consumed += consumed;
        Ok(consumed)
    }
}

/// Blind pass-through.
pub struct Copier<T: Sample> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Sample> Copier<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T: Sample> Default for Copier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample> ProcessOne for Copier<T> {
    type Inputs = (T,);
    type Outputs = (T,);
    fn process_one(&mut self, (value,): (T,)) -> (T,) {
        (value,)
    }
}

impl<T: Sample> Block for Copier<T> {
    fn name(&self) -> &str {
        "copier"
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_input::<T>("in"))]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_output::<T>("out"))]
    }

    fn work(&mut self, inputs: &[PortEntry], outputs: &[PortEntry]) -> WorkResult<usize> {
        let (Some(reader), Some(writer)) = (
            inputs.first().and_then(|e| e.as_port()).and_then(|p| p.reader::<T>()),
            outputs.first().and_then(|e| e.as_port()).and_then(|p| p.writer::<T>()),
        ) else {
            return Ok(0);
        };
        let mut copied = 0;
        while let Ok(value) = reader.try_recv() {
            writer.send(value)?;
            copied += 1;
        }
        Ok(copied)
    }
}

/// Multiplies every sample by a constant factor.
pub struct Scale<T> {
    factor: T,
}

impl<T: Sample + Mul<Output = T> + Copy> Scale<T> {
    pub fn new(factor: T) -> Self {
        Self { factor }
    }
}

impl<T: Sample + Mul<Output = T> + Copy> ProcessOne for Scale<T> {
    type Inputs = (T,);
    type Outputs = (T,);
    fn process_one(&mut self, (value,): (T,)) -> (T,) {
        (value * self.factor,)
    }
}

impl<T: Sample + Mul<Output = T> + Copy> ProcessBulk for Scale<T> {
    fn process_bulk(&mut self, inputs: &[(T,)], outputs: &mut Vec<(T,)>) {
        outputs.extend(inputs.iter().map(|(value,)| (*value * self.factor,)));
    }
}

impl<T: Sample + Mul<Output = T> + Copy> Block for Scale<T> {
    fn name(&self) -> &str {
        "scale"
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_input::<T>("original"))]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_output::<T>("scaled"))]
    }

    fn work(&mut self, inputs: &[PortEntry], outputs: &[PortEntry]) -> WorkResult<usize> {
        let (Some(reader), Some(writer)) = (
            inputs.first().and_then(|e| e.as_port()).and_then(|p| p.reader::<T>()),
            outputs.first().and_then(|e| e.as_port()).and_then(|p| p.writer::<T>()),
        ) else {
            return Ok(0);
        };
        let mut produced = 0;
        while let Ok(value) = reader.try_recv() {
            let (scaled,) = self.process_one((value,));
            writer.send(scaled)?;
            produced += 1;
        }
        Ok(produced)
    }
}

/// Adds two streams sample by sample.
pub struct Adder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Sample + Add<Output = T> + Copy> Adder<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T: Sample + Add<Output = T> + Copy> Default for Adder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample + Add<Output = T> + Copy> ProcessOne for Adder<T> {
    type Inputs = (T, T);
    type Outputs = (T,);
    fn process_one(&mut self, (a, b): (T, T)) -> (T,) {
        (a + b,)
    }
}

impl<T: Sample + Add<Output = T> + Copy> Block for Adder<T> {
    fn name(&self) -> &str {
        "adder"
    }

    fn input_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::Single(PortInfo::stream_input::<T>("addend0")),
            PortDecl::Single(PortInfo::stream_input::<T>("addend1")),
        ]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::Single(PortInfo::stream_output::<T>("sum"))]
    }

    fn work(&mut self, inputs: &[PortEntry], outputs: &[PortEntry]) -> WorkResult<usize> {
        let (Some(a), Some(b), Some(writer)) = (
            inputs.first().and_then(|e| e.as_port()).and_then(|p| p.reader::<T>()),
            inputs.get(1).and_then(|e| e.as_port()).and_then(|p| p.reader::<T>()),
            outputs.first().and_then(|e| e.as_port()).and_then(|p| p.writer::<T>()),
        ) else {
            return Ok(0);
        };
        let pairs = a.len().min(b.len());
        for _ in 0..pairs {
            let (Ok(left), Ok(right)) = (a.try_recv(), b.try_recv()) else {
                break;
            };
            let (sum,) = self.process_one((left, right));
            writer.send(sum)?;
        }
        Ok(pairs)
    }
}

/// Register the `f32` flavors of the basic blocks under stable type names.
pub fn register_basic_blocks(registry: &mut BlockRegistry) {
    registry.register("vector_source.f32", |_: &PropertyMap| VectorSource::<f32>::new(Vec::new()));
    registry.register("vector_sink.f32", |_: &PropertyMap| VectorSink::<f32>::new());
    registry.register("null_sink.f32", |_: &PropertyMap| NullSink::<f32>::new());
    registry.register("copier.f32", |_: &PropertyMap| Copier::<f32>::new());
    registry.register("adder.f32", |_: &PropertyMap| Adder::<f32>::new());
    registry.register("scale.f32", |settings: &PropertyMap| {
        let factor = settings.get("factor").and_then(|v| v.as_f64()).unwrap_or(1.0);
        Scale::new(factor as f32)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::edge::EdgeOptions;
    use crate::runtime::errors::ConnectionResult;
    use crate::runtime::graph::Graph;
    use crate::runtime::merged::merge_by_index;
    use std::sync::Arc;

    fn init_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn pump(graph: &mut Graph, rounds: usize) {
        let ids: Vec<_> = graph.block_ids().collect();
        for _ in 0..rounds {
            for id in &ids {
                graph.model_mut(*id).unwrap().work(1024).unwrap();
            }
        }
    }

    #[test]
    fn scale_and_adder_kernels() {
        let mut scale = Scale::new(2.0f32);
        assert_eq!(scale.process_one((3.0,)), (6.0,));

        let mut bulk = Vec::new();
        scale.process_bulk(&[(1.0,), (2.0,)], &mut bulk);
        assert_eq!(bulk, vec![(2.0,), (4.0,)]);

        let mut adder = Adder::new();
        assert_eq!(adder.process_one((3.0f32, 4.0)), (7.0,));
    }

    #[test]
    fn samples_flow_through_a_resolved_graph() {
        init_logging();
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let mut graph = Graph::new();
        let src = graph.add_block(VectorSource::new(data.clone()));
        let mid = graph.add_block(Copier::<f32>::new());
        let snk = graph.add_block(VectorSink::<f32>::new());

        graph.connect::<f32, _>(&src, "out").unwrap().to(&mid, "in").unwrap();
        graph.connect::<f32, _>(&mid, "out").unwrap().to(&snk, "in").unwrap();
        assert!(graph.connect_pending_edges());

        pump(&mut graph, 3);
        assert_eq!(graph.get::<VectorSink<f32>>(&snk).unwrap().received(), data.as_slice());
    }

    #[test]
    fn fan_out_duplicates_the_stream() {
        let data = vec![5.0f32, 6.0];
        let mut graph = Graph::new();
        let src = graph.add_block(VectorSource::new(data.clone()));
        let a = graph.add_block(VectorSink::<f32>::new());
        let b = graph.add_block(VectorSink::<f32>::new());

        graph
            .connect::<f32, _>(&src, "out")
            .unwrap()
            .to(&a, "in")
            .unwrap()
            .to(&b, "in")
            .unwrap();
        assert!(graph.connect_pending_edges());

        pump(&mut graph, 2);
        assert_eq!(graph.get::<VectorSink<f32>>(&a).unwrap().received(), data.as_slice());
        assert_eq!(graph.get::<VectorSink<f32>>(&b).unwrap().received(), data.as_slice());
    }

    #[test]
    fn fused_pipeline_matches_the_buffered_one() {
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();

        // buffered: source -> scale -> sink
        let mut graph = Graph::new();
        let src = graph.add_block(VectorSource::new(data.clone()));
        let scale = graph.add_block(Scale::new(3.0f32));
        let snk = graph.add_block(VectorSink::<f32>::new());
        graph.connect::<f32, _>(&src, "out").unwrap().to(&scale, "original").unwrap();
        graph.connect::<f32, _>(&scale, "scaled").unwrap().to(&snk, "in").unwrap();
        assert!(graph.connect_pending_edges());
        pump(&mut graph, 3);

        // fused: scale . copier, no intermediate buffer
        let mut fused = merge_by_index::<0, 0, _, _>(Copier::<f32>::new(), Scale::new(3.0f32));
        let fused_out: Vec<f32> = data.iter().map(|&x| fused.process_one((x,)).0).collect();

        assert_eq!(graph.get::<VectorSink<f32>>(&snk).unwrap().received(), fused_out.as_slice());
    }

    #[test]
    fn registry_built_pipeline_applies_settings() {
        let mut registry = BlockRegistry::new();
        register_basic_blocks(&mut registry);
        let mut graph = Graph::with_registry(Arc::new(registry));

        let src = graph.add_block(VectorSource::new(vec![1.0f32, 2.0]));
        let mut settings = PropertyMap::new();
        settings.insert("factor".to_string(), serde_json::json!(10.0));
        let scale = graph.emplace_block("scale.f32", settings).unwrap();
        let snk = graph.add_block(VectorSink::<f32>::new());

        assert_eq!(
            graph.connect_dynamic(src.id(), "out", scale, "original", EdgeOptions::default()),
            ConnectionResult::Success
        );
        assert_eq!(
            graph.connect_dynamic(scale, "scaled", snk.id(), "in", EdgeOptions::default()),
            ConnectionResult::Success
        );
        assert!(graph.connect_pending_edges());

        pump(&mut graph, 3);
        assert_eq!(graph.get::<VectorSink<f32>>(&snk).unwrap().received(), &[10.0, 20.0]);
    }

    #[test]
    fn adder_consumes_streams_pairwise() {
        let mut graph = Graph::new();
        let left = graph.add_block(VectorSource::new(vec![1.0f32, 2.0, 3.0]));
        let right = graph.add_block(VectorSource::new(vec![10.0f32, 20.0, 30.0]));
        let adder = graph.add_block(Adder::<f32>::new());
        let snk = graph.add_block(VectorSink::<f32>::new());

        graph.connect::<f32, _>(&left, "out").unwrap().to(&adder, "addend0").unwrap();
        graph.connect::<f32, _>(&right, "out").unwrap().to(&adder, "addend1").unwrap();
        graph.connect::<f32, _>(&adder, "sum").unwrap().to(&snk, "in").unwrap();
        assert!(graph.connect_pending_edges());

        pump(&mut graph, 3);
        assert_eq!(graph.get::<VectorSink<f32>>(&snk).unwrap().received(), &[11.0, 22.0, 33.0]);
    }
}
