use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::data::{prepare_candles, CandleCache};
use crate::error::TradingError;
use crate::execution::{Fill, LiveExecutor, Portfolio};
use crate::features::{AccountContext, FeaturePipeline};
use crate::live::status::{BotState, StatusHandle};
use crate::models::{Order, OrderIntent, Timeframe, Trade};
use crate::risk::{MaturityLevel, RiskDecision, RiskLimits, RiskManager, VetoReason};
use crate::strategy::{DecisionContext, Policy};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub check_interval: Duration,
    /// Candles requested from the exchange every cycle
    pub history_candles: usize,
    pub interpolate_gaps: bool,
    pub maturity: MaturityLevel,
}

/// What one scheduling cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Paused,
    WarmingUp { have: usize, need: usize },
    Held,
    Vetoed(VetoReason),
    /// Allowed by the risk gate but not by the maturity level
    Suppressed(RiskDecision),
    Executed { order: Order, trade: Option<Trade> },
}

/// Operator handle: stop, resume and read status from another task
#[derive(Clone)]
pub struct LiveControl {
    stop: Arc<watch::Sender<bool>>,
    paused: Arc<AtomicBool>,
    status: StatusHandle,
}

impl LiveControl {
    /// Takes effect between cycles
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn resume(&self) {
        resume_shared(&self.paused, &self.status);
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }
}

fn resume_shared(paused: &AtomicBool, status: &StatusHandle) {
    if paused.swap(false, Ordering::SeqCst) {
        info!("▶️  Trading resumed by operator");
    }
    status.update(|s| {
        s.state = if s.is_running {
            BotState::Running
        } else {
            BotState::Stopped
        };
        s.last_error = None;
    });
}

/// Scheduled decide-and-execute loop for one symbol
pub struct LiveRunner {
    config: LiveConfig,
    pipeline: FeaturePipeline,
    risk: RiskManager,
    executor: LiveExecutor,
    policy: Box<dyn Policy>,
    portfolio: Portfolio,
    cache: CandleCache,
    status: StatusHandle,
    paused: Arc<AtomicBool>,
    /// Set until a reconcile has seen the real account
    baselined: bool,
    /// Set while orders may still be resting on the exchange
    needs_reconcile: bool,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl LiveRunner {
    pub fn new(
        config: LiveConfig,
        pipeline: FeaturePipeline,
        limits: RiskLimits,
        executor: LiveExecutor,
        policy: Box<dyn Policy>,
        initial_balance: f64,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let cache = CandleCache::new(config.history_candles.max(1) * 2);
        Self {
            config,
            pipeline,
            risk: RiskManager::new(limits),
            executor,
            policy,
            portfolio: Portfolio::new(initial_balance),
            cache,
            status: StatusHandle::default(),
            paused: Arc::new(AtomicBool::new(false)),
            baselined: false,
            needs_reconcile: false,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn control(&self) -> LiveControl {
        LiveControl {
            stop: self.stop_tx.clone(),
            paused: self.paused.clone(),
            status: self.status.clone(),
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn cache(&self) -> &CandleCache {
        &self.cache
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn resume(&self) {
        resume_shared(&self.paused, &self.status);
    }

    fn pause(&self, reason: &str) {
        self.paused.store(true, Ordering::SeqCst);
        self.status.update(|s| {
            s.state = BotState::Paused;
            s.last_error = Some(reason.to_string());
        });
        error!("⏸️  Trading paused: {}", reason);
    }

    /// Bring the local ledger in line with the exchange
    ///
    /// Resting orders for the symbol are cancelled first; if any cannot be
    /// cancelled the runner stays paused and reconciles again before its
    /// next cycle. Balances and positions are then taken from the exchange,
    /// and the first successful reconcile also resets the drawdown baseline
    /// to the account's real equity.
    pub async fn reconcile(&mut self) -> Result<Vec<String>> {
        let exchange = self.executor.exchange().clone();
        let symbol = self.config.symbol.clone();
        let mut divergences = Vec::new();
        let mut resting = Vec::new();

        for order in exchange.open_orders(&symbol).await? {
            match exchange.cancel_order(&symbol, &order.client_order_id).await {
                Ok(cancelled) if cancelled.status.is_terminal() => {
                    divergences.push(format!(
                        "open order {} cancelled ({:.6} filled)",
                        cancelled.client_order_id, cancelled.filled_quantity
                    ));
                }
                Ok(still_open) => resting.push(still_open.client_order_id),
                Err(e) => {
                    warn!("Reconcile: cancelling {} failed: {}", order.client_order_id, e);
                    resting.push(order.client_order_id);
                }
            }
        }

        let balances = exchange.balances().await?;
        divergences.extend(
            self.portfolio
                .reconcile(balances.cash, &balances.positions, Utc::now()),
        );

        if !self.baselined {
            self.portfolio.rebase();
            self.baselined = true;
            info!(
                "💰 Starting equity from {}: ${:.2}",
                exchange.name(),
                self.portfolio.initial_balance()
            );
        }

        if divergences.is_empty() {
            debug!("Reconcile: local portfolio matches {}", exchange.name());
        } else {
            for divergence in &divergences {
                warn!("Reconcile: {}", divergence);
            }
        }

        self.needs_reconcile = !resting.is_empty();
        if self.needs_reconcile {
            self.pause(&format!(
                "open orders still resting on {}: {}",
                exchange.name(),
                resting.join(", ")
            ));
        }
        Ok(divergences)
    }

    /// Reconcile, then run cycles every `check_interval` until stopped
    pub async fn run(&mut self) -> Result<()> {
        self.reconcile().await?;
        self.status.update(|s| {
            s.is_running = true;
            s.state = if self.paused.load(Ordering::SeqCst) {
                BotState::Paused
            } else {
                BotState::Running
            };
        });

        info!(
            "🚀 Live trading {} on {} every {:?} with {} ({:?})",
            self.config.symbol,
            self.executor.exchange().name(),
            self.config.check_interval,
            self.policy.name(),
            self.config.maturity
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stop = self.stop_rx.clone();

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.tick().await;
        }

        self.status.update(|s| {
            s.is_running = false;
            s.state = BotState::Stopped;
        });
        info!("👋 Live trading stopped");
        Ok(())
    }

    /// One cycle; a failed cycle is logged and followed by a reconcile
    pub async fn tick(&mut self) -> Option<CycleOutcome> {
        match self.run_cycle().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Cycle failed: {}", e);
                self.status.update(|s| {
                    s.last_update = Some(Utc::now());
                    s.last_error = Some(e.to_string());
                });
                if let Err(re) = self.reconcile().await {
                    warn!("Reconcile after failed cycle also failed: {}", re);
                    self.needs_reconcile = true;
                }
                None
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if self.is_paused() {
            debug!("Paused, skipping cycle");
            return Ok(CycleOutcome::Paused);
        }
        if self.needs_reconcile {
            self.reconcile().await?;
            if self.is_paused() {
                return Ok(CycleOutcome::Paused);
            }
        }

        let symbol = self.config.symbol.clone();
        let timeframe = self.config.timeframe;
        let fetched = self
            .executor
            .exchange()
            .recent_candles(&symbol, timeframe, self.config.history_candles)
            .await?;
        self.cache.merge(&symbol, &fetched).map_err(TradingError::Cache)?;
        let cached = self.cache.get_candles(&symbol).map_err(TradingError::Cache)?;
        let start = cached.len().saturating_sub(self.config.history_candles);
        let candles = prepare_candles(
            cached[start..].to_vec(),
            timeframe,
            self.config.interpolate_gaps,
        )?;

        let need = self
            .pipeline
            .warmup_candles()
            .max(self.policy.min_candles_required());
        let Some(latest) = candles.last().copied() else {
            return Ok(CycleOutcome::WarmingUp { have: 0, need });
        };
        if candles.len() < need {
            info!("    → Collecting data... ({}/{} needed)", candles.len(), need);
            return Ok(CycleOutcome::WarmingUp {
                have: candles.len(),
                need,
            });
        }

        let price = latest.close;
        let now = Utc::now();
        self.portfolio.mark_to_market(&symbol, price);

        let position_quantity = self
            .portfolio
            .position(&symbol)
            .map(|p| p.quantity)
            .unwrap_or(0.0);
        let account = AccountContext::from_values(
            self.portfolio.cash_balance(),
            position_quantity * price,
            self.portfolio.unrealized_pnl(),
        );
        let state = self.pipeline.compute_state(&candles, account)?;
        let action = self.policy.decide(&DecisionContext {
            candles: &candles,
            state: &state,
            position_quantity,
        });

        let decision = self.risk.gate(
            &action,
            &self.portfolio.account_snapshot(&symbol, price),
            &self.portfolio.activity(now),
            now,
        );

        let indicators = self.pipeline.indicator_snapshot(&candles);
        let signal = format!("{} -> {}", action, decision.label());
        info!("  {} @ ${:.4}: {}", symbol, price, signal);
        self.status.update(|s| {
            s.last_update = Some(now);
            s.signal = Some(signal);
            s.indicators = indicators;
        });

        let outcome = match decision {
            RiskDecision::Hold => CycleOutcome::Held,
            RiskDecision::Veto(reason) => {
                info!("    ⛔ Vetoed: {}", reason);
                CycleOutcome::Vetoed(reason)
            }
            _ if !self.config.maturity.permits(&decision) => {
                info!(
                    "    📝 {:?}: not executing {}",
                    self.config.maturity,
                    decision.label()
                );
                CycleOutcome::Suppressed(decision)
            }
            _ => match decision.order() {
                Some((side, amount)) => {
                    let intent = OrderIntent::market(&symbol, side, amount);
                    let order = match self.executor.submit(&intent).await {
                        Ok(order) => order,
                        Err(e) => {
                            self.pause(&e.to_string());
                            return Err(e.into());
                        }
                    };

                    let trade = match Fill::from_order(&order) {
                        Some(fill) => self.portfolio.apply_fill(&symbol, &fill)?,
                        None => None,
                    };
                    info!(
                        "    ✅ {} {:.6} {} @ ${:.4} ({:?})",
                        order.side,
                        order.filled_quantity,
                        symbol,
                        order.avg_fill_price,
                        order.status
                    );
                    CycleOutcome::Executed { order, trade }
                }
                None => CycleOutcome::Held,
            },
        };

        let snapshot = self.portfolio.snapshot(now);
        info!(
            "  💼 Equity ${:.2} (cash ${:.2}, realized {:+.2}, unrealized {:+.2})",
            snapshot.total_value, snapshot.cash, snapshot.realized_pnl, snapshot.unrealized_pnl
        );
        self.status.update(|s| s.portfolio = Some(snapshot));

        Ok(outcome)
    }
}
