use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use media_queue::cli::{Cli, Command};
use media_queue::common::logger::{PrettyLogger, init_tracing};
use media_queue::downloader::progress::QueueProgressView;
use media_queue::downloader::{
    Collaborators, ConnectivityProbe, DirectorySink, DownloadStatus, FileStore, HttpTransport,
    NetworkMonitor, QueueEvent, QueueScheduler, SystemClock, UrlResolver,
};
use media_queue::{QueueConfig, log_error, log_info, log_success, log_warning};

/// 根据命令行参数和配置文件构造调度器
async fn build_scheduler(args: &Cli) -> Result<QueueScheduler> {
    let mut config = QueueConfig::load(&args.config)?;
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_downloads = concurrency;
    }
    debug!("队列配置: {:?}", config);

    let store = FileStore::open(&args.state_file)
        .await
        .with_context(|| format!("无法打开状态文件 {}", args.state_file.display()))?;

    let collaborators = Collaborators {
        store: Arc::new(store),
        transport: Arc::new(HttpTransport::new()),
        sink: Arc::new(DirectorySink::new(&args.output_dir)),
        resolver: Arc::new(UrlResolver),
        clock: Arc::new(SystemClock),
    };
    Ok(QueueScheduler::new(
        config,
        collaborators,
        NetworkMonitor::default(),
    )?)
}

async fn run_queue(
    scheduler: &QueueScheduler,
    watch: bool,
    probe_url: Option<String>,
) -> Result<()> {
    let view = Arc::new(Mutex::new(QueueProgressView::new()));
    let _subscription = scheduler.subscribe({
        let view = Arc::clone(&view);
        move |items| {
            if let Ok(mut view) = view.lock() {
                view.render(items);
            }
        }
    });

    let shutdown = CancellationToken::new();
    let probe_url = probe_url.or_else(|| scheduler.config().probe_url.clone());
    if let Some(url) = probe_url {
        info!("启用网络探测: {}", url);
        ConnectivityProbe::new(url, scheduler.config().probe_interval())
            .spawn(scheduler.network().clone(), shutdown.clone());
    }

    let mut events = scheduler.events();
    let handle = scheduler.start().await?;
    PrettyLogger::queue_status(&scheduler.status().await);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut check = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("收到中断信号，正在停止...");
                break;
            }
            event = events.recv() => match event {
                Ok(QueueEvent::Failed { id, error, retry_in: None, .. }) => {
                    log_error!("下载失败: {} ({})", id, error);
                }
                Ok(QueueEvent::NetworkChanged(state)) => {
                    log_warning!("网络状态: {}", state);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("跳过了 {} 条事件", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = check.tick() => {
                // 其他 mqdl 进程可能改写了状态文件
                scheduler.sync();
                if !watch && !scheduler.has_pending_work().await? {
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    scheduler.shutdown();
    let _ = handle.await;

    let items = scheduler.list().await?;
    let completed = items
        .iter()
        .filter(|item| item.status == DownloadStatus::Completed)
        .count();
    let failed = items
        .iter()
        .filter(|item| item.status == DownloadStatus::Failed)
        .count();
    println!(
        "\n{} 完成 {}，失败 {}，共 {} 条记录",
        "🎉".green().bold(),
        completed,
        failed,
        items.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Cli::parse();
    init_tracing(args.verbose);

    let scheduler = build_scheduler(&args).await?;

    match &args.command {
        Command::Add { url, priority } => {
            let item = scheduler.add_download(url, *priority).await?;
            log_success!("已加入队列: {}", item.id);
        }
        Command::List => {
            PrettyLogger::queue(&scheduler.list().await?);
        }
        Command::Pause { id } => {
            scheduler.pause_download(id).await?;
            log_info!("已暂停: {}", id);
        }
        Command::Resume { id } => {
            scheduler.resume_download(id).await?;
            log_info!("已恢复: {}", id);
        }
        Command::Cancel { id } => {
            scheduler.cancel_download(id).await?;
            log_info!("已取消: {}", id);
        }
        Command::Retry { id } => {
            scheduler.retry_download(id).await?;
            log_info!("已重新排队: {}", id);
        }
        Command::Prune => {
            let removed = scheduler.prune_finished().await?;
            log_success!("清理了 {} 条记录", removed);
        }
        Command::Run { watch, probe_url } => {
            run_queue(&scheduler, *watch, probe_url.clone()).await?;
        }
    }

    Ok(())
}
