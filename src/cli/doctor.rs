use crate::server::config::AppConfig;
use crate::server::{build_components, load_config};
use aegis_core::quota::{CounterBackend, RedisBackend};
use std::path::Path;
use std::time::Instant;

fn has_valid_key(content: &str, key_name: &str, valid_prefix: &str) -> bool {
    content
        .lines()
        .find(|l| l.starts_with(&format!("{}=", key_name)))
        .map(|l| l.trim_start_matches(&format!("{}=", key_name)))
        .map(|v| {
            !v.is_empty()
                && !v.contains("your")
                && (valid_prefix.is_empty() || v.starts_with(valid_prefix))
        })
        .unwrap_or(false)
}

pub async fn run(live: bool) -> anyhow::Result<()> {
    println!("🏥 Aegis Doctor\n");

    let mut all_ok = true;

    all_ok &= check_env_file();
    let config = match check_config() {
        Some(config) => config,
        None => {
            println!("\n⚠️  Configuration is invalid. Fix it before running other checks.");
            std::process::exit(1);
        }
    };
    all_ok &= check_api_key();
    check_redis(&config).await;
    if live {
        all_ok &= check_llm_live(&config).await;
    }

    println!();
    if all_ok {
        println!("✅ All checks passed! Ready to run Aegis.");
    } else {
        println!("⚠️  Some checks failed. Please fix the issues above.");
        std::process::exit(1);
    }

    Ok(())
}

fn check_env_file() -> bool {
    print!("Checking .env file... ");

    if Path::new(".env").exists() {
        println!("✅ Found");
    } else {
        println!("ℹ️  Not found (using process environment)");
    }
    true
}

fn check_config() -> Option<AppConfig> {
    print!("Checking configuration... ");

    match load_config() {
        Ok(config) => {
            let r = &config.resilience;
            println!("✅ Valid");
            println!(
                "  ℹ️  {} requests / {}s per tenant, {} concurrent calls, {} attempts",
                r.quota.request_limit,
                r.quota.window_secs,
                r.concurrency.max_concurrency,
                r.retry.max_attempts
            );
            Some(config)
        }
        Err(e) => {
            println!("❌ {:#}", e);
            None
        }
    }
}

fn check_api_key() -> bool {
    print!("Checking DeepSeek API key... ");

    let from_env = std::env::var("DEEPSEEK_API_KEY").unwrap_or_default();
    let env_content = std::fs::read_to_string(".env").unwrap_or_default();

    if from_env.starts_with("sk-") || has_valid_key(&env_content, "DEEPSEEK_API_KEY", "sk-") {
        println!("✅ Configured");
        true
    } else {
        println!("❌ DEEPSEEK_API_KEY is not set");
        println!("  Add DEEPSEEK_API_KEY=sk-... to .env");
        false
    }
}

/// Redis is optional: without it quotas are enforced per process only
async fn check_redis(config: &AppConfig) -> bool {
    print!("Checking Redis... ");

    let Some(url) = config.redis.effective_url() else {
        println!("ℹ️  Disabled (quota mode: LOCAL)");
        return true;
    };

    let backend = match RedisBackend::new(url, config.resilience.quota.command_timeout()) {
        Ok(backend) => backend,
        Err(e) => {
            println!("⚠️  {}", e);
            return false;
        }
    };

    let start = Instant::now();
    match backend.ping().await {
        Ok(()) => {
            println!(
                "✅ Connected in {}ms (quota mode: DISTRIBUTED)",
                start.elapsed().as_millis()
            );
            true
        }
        Err(e) => {
            println!("⚠️  {} (quota mode: LOCAL)", e);
            false
        }
    }
}

async fn check_llm_live(config: &AppConfig) -> bool {
    print!("Checking LLM connectivity... ");

    let components = match build_components(config).await {
        Ok(components) => components,
        Err(e) => {
            println!("❌ {:#}", e);
            return false;
        }
    };

    let stats = components.provider.stats();
    match components.provider.health_check().await {
        Ok(()) => {
            println!("✅ {} responded", stats.model);
            true
        }
        Err(e) => {
            println!("❌ {}", e);
            false
        }
    }
}
