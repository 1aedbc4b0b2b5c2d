use std::{path::PathBuf, rc::Rc};

use anyhow::Context;
use prism_crate_tools::{
    init_log::{init_log, parse_level},
    resource::PrismPath,
};
use prism_gfx::foundation::vulkan_device::VulkanDevice;

use crate::{app::HeadlessApp, config::PrismConfig};

mod app;
mod config;
mod demo_scene;

fn main() -> anyhow::Result<()> {
    // 第一个参数可以指定配置文件，默认使用工作区根目录下的 prism.toml
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PrismPath::config_path("prism.toml"));
    let config = PrismConfig::load_or_default(&config_path)?;

    init_log(parse_level(&config.log.level));
    app::init_env();
    log::info!("load config from {}", config_path.display());

    let device = Rc::new(VulkanDevice::new(&config.gfx).context("failed to initialize vulkan device")?);

    {
        let mut app = HeadlessApp::new(&device, config)?;
        app.run()?;
        log::info!("end run, {} instances in scene.", app.instance_count());
    }

    // 所有资源都已经释放，此时设备是唯一的引用
    debug_assert_eq!(Rc::strong_count(&device), 1);
    Ok(())
}
