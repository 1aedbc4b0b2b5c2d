/// CPU 侧的材质数据
///
/// 加速结构只关心 instance 是否带有材质，着色相关的参数由外部使用
#[derive(Clone, Debug, Default)]
pub struct Material {
    pub name: String,
    pub base_color: glam::Vec4,
    pub emissive: glam::Vec4,
    pub roughness: f32,
    pub opaque: f32,
}
