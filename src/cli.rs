use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 断网也不怕的媒体下载队列
#[derive(Parser, Debug)]
#[command(name = "mqdl")]
#[command(version)]
#[command(about = "持久化、可重试、限并发的媒体下载队列", long_about = None)]
pub struct Cli {
    /// 队列状态文件
    #[arg(long, value_name = "FILE", global = true)]
    #[arg(default_value = "queue.state")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub state_file: PathBuf,

    /// 下载文件保存目录
    #[arg(long, value_name = "DIR", global = true)]
    #[arg(default_value = "./downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// JSON 配置文件
    #[arg(long, value_name = "FILE", global = true)]
    #[arg(default_value = "mqdl.json")]
    pub config: PathBuf,

    /// 同时下载的任务数（覆盖配置文件）
    #[arg(long, value_name = "N", global = true)]
    pub concurrency: Option<usize>,

    /// 输出调试日志
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 添加下载任务
    Add {
        /// 资源链接
        #[arg(value_hint = clap::ValueHint::Url)]
        url: String,

        /// 优先级，越大越先下载
        #[arg(long, short)]
        priority: Option<i32>,
    },
    /// 列出队列中的任务
    List,
    /// 暂停任务
    Pause { id: String },
    /// 恢复已暂停的任务
    Resume { id: String },
    /// 从队列中删除任务
    Cancel { id: String },
    /// 重新尝试已失败的任务
    Retry { id: String },
    /// 清理已完成和已失败的记录
    Prune,
    /// 运行下载队列
    Run {
        /// 队列清空后继续等待新任务
        #[arg(long)]
        watch: bool,

        /// 用于探测网络连通性的地址（覆盖配置文件）
        #[arg(long, value_name = "URL")]
        probe_url: Option<String>,
    },
}
