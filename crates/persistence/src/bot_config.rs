use sqlx::SqlitePool;

use common::{BotConfig, PlaybookToggles, Result};

/// sqlx-backed repository for the single-row `bot_config` table (id = 1).
pub struct BotConfigRepo {
    pool: SqlitePool,
}

impl BotConfigRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> Result<Option<BotConfig>> {
        let row = sqlx::query_as::<_, BotConfigRow>("SELECT * FROM bot_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(BotConfigRow::into_config).transpose()
    }

    pub async fn save(&self, config: &BotConfig) -> Result<()> {
        let universe_json = serde_json::to_string(&config.universe)?;

        sqlx::query(
            r#"
            INSERT INTO bot_config (
                id, universe_json, min_volume_quote, max_spread_bps, min_tob_depth_quote,
                r_pct, max_exposure_pct, max_concurrent_positions, reserve_target_pct,
                reserve_floor_pct, max_portfolio_heat_pct, cooldown_minutes,
                daily_loss_limit_r, weekly_loss_limit_r,
                playbook_a_enabled, playbook_b_enabled, playbook_c_enabled, playbook_d_enabled,
                playbook_b_max_trades_per_session
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(id) DO UPDATE SET
                universe_json = excluded.universe_json,
                min_volume_quote = excluded.min_volume_quote,
                max_spread_bps = excluded.max_spread_bps,
                min_tob_depth_quote = excluded.min_tob_depth_quote,
                r_pct = excluded.r_pct,
                max_exposure_pct = excluded.max_exposure_pct,
                max_concurrent_positions = excluded.max_concurrent_positions,
                reserve_target_pct = excluded.reserve_target_pct,
                reserve_floor_pct = excluded.reserve_floor_pct,
                max_portfolio_heat_pct = excluded.max_portfolio_heat_pct,
                cooldown_minutes = excluded.cooldown_minutes,
                daily_loss_limit_r = excluded.daily_loss_limit_r,
                weekly_loss_limit_r = excluded.weekly_loss_limit_r,
                playbook_a_enabled = excluded.playbook_a_enabled,
                playbook_b_enabled = excluded.playbook_b_enabled,
                playbook_c_enabled = excluded.playbook_c_enabled,
                playbook_d_enabled = excluded.playbook_d_enabled,
                playbook_b_max_trades_per_session = excluded.playbook_b_max_trades_per_session
            "#,
        )
        .bind(universe_json)
        .bind(config.min_volume_quote)
        .bind(config.max_spread_bps)
        .bind(config.min_tob_depth_quote)
        .bind(config.r_pct)
        .bind(config.max_exposure_pct)
        .bind(config.max_concurrent_positions)
        .bind(config.reserve_target_pct)
        .bind(config.reserve_floor_pct)
        .bind(config.max_portfolio_heat_pct)
        .bind(config.cooldown_minutes)
        .bind(config.daily_loss_limit_r)
        .bind(config.weekly_loss_limit_r)
        .bind(config.playbooks.a_enabled)
        .bind(config.playbooks.b_enabled)
        .bind(config.playbooks.c_enabled)
        .bind(config.playbooks.d_enabled)
        .bind(config.playbooks.b_max_trades_per_session)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct BotConfigRow {
    universe_json: String,
    min_volume_quote: f64,
    max_spread_bps: f64,
    min_tob_depth_quote: f64,
    r_pct: f64,
    max_exposure_pct: f64,
    max_concurrent_positions: u32,
    reserve_target_pct: f64,
    reserve_floor_pct: f64,
    max_portfolio_heat_pct: f64,
    cooldown_minutes: i64,
    daily_loss_limit_r: f64,
    weekly_loss_limit_r: f64,
    playbook_a_enabled: bool,
    playbook_b_enabled: bool,
    playbook_c_enabled: bool,
    playbook_d_enabled: bool,
    playbook_b_max_trades_per_session: u32,
}

impl BotConfigRow {
    fn into_config(self) -> Result<BotConfig> {
        let universe: Vec<String> = serde_json::from_str(&self.universe_json)?;
        Ok(BotConfig {
            universe,
            min_volume_quote: self.min_volume_quote,
            max_spread_bps: self.max_spread_bps,
            min_tob_depth_quote: self.min_tob_depth_quote,
            r_pct: self.r_pct,
            max_exposure_pct: self.max_exposure_pct,
            max_concurrent_positions: self.max_concurrent_positions,
            reserve_target_pct: self.reserve_target_pct,
            reserve_floor_pct: self.reserve_floor_pct,
            max_portfolio_heat_pct: self.max_portfolio_heat_pct,
            cooldown_minutes: self.cooldown_minutes,
            daily_loss_limit_r: self.daily_loss_limit_r,
            weekly_loss_limit_r: self.weekly_loss_limit_r,
            playbooks: PlaybookToggles {
                a_enabled: self.playbook_a_enabled,
                b_enabled: self.playbook_b_enabled,
                c_enabled: self.playbook_c_enabled,
                d_enabled: self.playbook_d_enabled,
                b_max_trades_per_session: self.playbook_b_max_trades_per_session,
            },
        })
    }
}
