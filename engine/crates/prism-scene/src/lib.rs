//! 场景层
//!
//! - [`blas_cache::BlasCache`]：以 mesh 的 [`mesh::MeshId`] 为 key，缓存每个 mesh 的 BLAS
//! - [`tlas_builder::SceneAccelBuilder`]：每帧遍历场景，重建整个场景的 TLAS，并通过 descriptor 发布
//! - [`scene_manager::SceneManager`]：CPU 侧的场景数据，实现 [`scene_source::RtSceneSource`]

pub mod blas_cache;
pub mod components;
pub mod frame_counter;
pub mod guid_new_type;
pub mod mesh;
pub mod scene_manager;
pub mod scene_source;
pub mod shapes;
pub mod tlas_builder;
