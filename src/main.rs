use anyhow::Result;
use std::path::PathBuf;

use margin_extract::config::Config;
use margin_extract::utils::logging;
use margin_extract::App;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（第一个参数为配置文件路径）
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;

    // 初始化日志
    logging::init(&config.logging)?;

    // 初始化并运行应用
    let _summary = App::initialize(config).await?.run().await?;

    Ok(())
}
