use std::io::Write;

/// 使用默认的 Info 级别初始化日志
///
/// 会额外解析 `RUST_LOG` 环境变量，可以覆盖默认级别
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

pub fn init_log_with_level(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));
            let debug_style = buf
                .default_level_style(log::Level::Debug)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Cyan)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                log::Level::Debug => debug_style,
                log::Level::Trace => buf.default_level_style(log::Level::Trace),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let black_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            // 只保留 crate 名，例如 lumis_postfx::orchestrator -> lumis_postfx
            let target = record.target().split("::").next().unwrap_or("");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {grey_style}[{target}] [{file}:{line}]{grey_style:#} \
                 {black_style}{}{black_style:#}",
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        // 测试中可能被多次调用，忽略重复初始化
        .try_init();
}
