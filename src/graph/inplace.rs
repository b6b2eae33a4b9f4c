//! In-place eligibility.
//!
//! A writer may overwrite its input only when the buffer behind that input
//! has no other reader once the writer ran, in forward or in backward. The
//! buffer is followed up through producers that already run in place,
//! since their output is the same physical buffer as their input.

use burn::tensor::backend::Backend;

use super::core::{GraphCore, GraphNode, NodeId};
use super::node::{InPlace, LayerNode};
use crate::errors::GraphError;
use crate::layers::InPlaceSupport;

/// Decides how node `id` may share its input buffer.
///
/// Producers must already carry their own decision, so nodes are decided
/// in sorted order.
pub(crate) fn can_execute_in_place<B: Backend>(
    graph: &GraphCore<LayerNode<B>>,
    id: NodeId,
) -> Result<InPlace, GraphError> {
    let node = graph.node(id);
    if node.input_connections().len() != 1 {
        return Ok(InPlace::None);
    }

    match node.layer().in_place() {
        InPlaceSupport::None => Ok(InPlace::None),
        InPlaceSupport::View => Ok(InPlace::NonRestricting),
        InPlaceSupport::ElementWise => {
            if node.num_outputs() != 1 {
                return Ok(InPlace::None);
            }
            let mut current = id;
            loop {
                let Some(&producer) = graph.producers(current)?.first() else {
                    return Ok(InPlace::None);
                };
                current = producer;
                if !has_single_reader(graph.node(current)) {
                    return Ok(InPlace::None);
                }
                if graph.node(current).in_place() == InPlace::None {
                    return Ok(InPlace::Restricting);
                }
            }
        }
    }
}

/// True when a single consumer is the only one touching the output of
/// `producer` after it is written.
fn has_single_reader<B: Backend>(producer: &LayerNode<B>) -> bool {
    if producer.is_graph_input() {
        return false;
    }
    if producer.layer().needs_output_for_backward() && producer.needs_gradient() {
        return false;
    }
    match producer.output_connections() {
        [consumers] => consumers.len() == 1,
        _ => false,
    }
}
