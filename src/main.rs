use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use chatdigest::config::AppConfig;
use chatdigest::pipeline::UpdateService;
use chatdigest::server;
use chatdigest::utils::logger;
use chatdigest::utils::scheduler::TaskScheduler;

#[derive(Parser)]
#[command(name = "chatdigest")]
#[command(about = "对话话题追踪与每日推送", long_about = None)]
struct Cli {
    /// 启动 Web 仪表盘
    #[arg(long)]
    web: bool,
    /// 立即执行一次推送
    #[arg(long)]
    update: bool,
    /// 按 UPDATE_TIME 每天执行推送
    #[arg(long)]
    schedule: bool,
    /// Web 监听地址
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Web 监听端口
    #[arg(long, default_value_t = 5000)]
    port: u16,
    /// 输出 debug 日志
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    logger::init_logger(cli.debug);
    info!("chatdigest 启动");

    let config = AppConfig::load()?;
    let service = Arc::new(UpdateService::from_config(&config).await?);

    if cli.update {
        update_command(&service).await;
    }

    let scheduler = if cli.schedule {
        Some(schedule_command(&config, service.clone()).await?)
    } else {
        None
    };

    // 未指定 --update / --schedule 时默认启动 Web
    if cli.web || (!cli.update && !cli.schedule) {
        server::run_server(&cli.host, cli.port, service, shutdown_signal()).await?;
    } else if scheduler.is_some() {
        info!("调度器运行中，按 Ctrl+C 停止");
        tokio::signal::ctrl_c().await?;
        info!("收到停止信号");
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }

    Ok(())
}

async fn update_command(service: &UpdateService) {
    info!("执行一次性推送...");
    if !service.run_daily_update().await {
        error!("本次推送未能送达");
    }
}

async fn schedule_command(config: &AppConfig, service: Arc<UpdateService>) -> Result<TaskScheduler> {
    let time = config.schedule_time()?;
    info!("启动定时任务调度器，每天 {} 执行", time);

    let scheduler = TaskScheduler::new().await?;
    scheduler
        .add_daily_job(time, move || {
            let service = service.clone();
            async move {
                service.run_daily_update().await;
            }
        })
        .await?;
    scheduler.start().await?;

    Ok(scheduler)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("监听停止信号失败: {}", e);
    }
    info!("收到停止信号");
}
