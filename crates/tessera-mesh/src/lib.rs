//! Box meshing for streamed regions: the greedy box kernel and the
//! double-buffered instance accumulator fed to the GPU.

pub mod greedy;
pub mod instances;

pub use greedy::{GreedyBoxMesher, MeshBuffers, MeshKernel, greedy_boxes};
pub use instances::{BoxInstance, MeshAccumulator};
