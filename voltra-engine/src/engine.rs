//! The strategy engine: drives the per-bar flow across both aggregates and
//! every domain service, publishes domain events and owns recovery.
//!
//! All per-bar errors are caught here, logged with bar time and symbol, and
//! the engine moves on to the next bar. Only startup and state-corruption
//! errors propagate.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime};
use serde_json::json;

use voltra_config::AppConfig;
use voltra_core::{AccountData, BarData, OptionType, OrderInstruction, OrderStatus, VtSymbol};
use voltra_domain::{
    InstrumentAggregate, InstrumentSnapshot, PositionAggregate, PositionSnapshot, TrackedOrder,
};
use voltra_events::{DomainEvent, EventBus};
use voltra_execution::{
    AdvancedOrderScheduler, ChildOrder, RetryOutcome, SmartOrderExecutor,
};
use voltra_gateway::{GatewayEvent, TradingGateway};
use voltra_greeks::{
    bs_price, greeks, implied_volatility, BsParams, IvConfig, PortfolioGreeks,
    PositionGreeksEntry, RiskAggregator, VolQuote, VolSurface,
};
use voltra_hedging::{DeltaHedgingEngine, GammaScalpingEngine};
use voltra_persistence::{markers, AutoSave, JsonSerializer, LoadOutcome, MonitorWriter, StateRepository};
use voltra_services::{check_liquidity, OptionQuote, ServiceBundle, SizingContext};

use crate::EngineError;

/// Annualized rate used when backing implied vols out of quotes.
const RISK_FREE_RATE: f64 = 0.03;

/// Daily rollover check trigger.
const ROLLOVER_CHECK_TIME: (u32, u32) = (14, 50);

/// Map a timestamp to its trading date: the night session (after 20:00)
/// belongs to the next weekday's trading day.
#[must_use]
pub fn trading_date(datetime: DateTime<Local>) -> NaiveDate {
    let mut date = datetime.date_naive();
    if datetime.time() >= NaiveTime::from_hms_opt(20, 0, 0).expect("valid time") {
        date = date + Duration::days(1);
        while matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            date = date + Duration::days(1);
        }
    }
    date
}

/// Optional infrastructure handed to the engine at construction.
pub struct EngineDeps {
    pub repository: Option<StateRepository>,
    pub monitor: Option<MonitorWriter>,
}

impl EngineDeps {
    #[must_use]
    pub fn none() -> Self {
        Self {
            repository: None,
            monitor: None,
        }
    }
}

/// Application service orchestrating the whole per-bar trading flow.
///
/// Selection, indicator, signal and sizing logic all arrive through the
/// [`ServiceBundle`] ports; the engine owns no concrete strategy type.
pub struct StrategyEngine {
    config: AppConfig,
    gateway: Box<dyn TradingGateway>,
    services: ServiceBundle,

    instruments: InstrumentAggregate,
    positions: PositionAggregate,

    risk: RiskAggregator,
    executor: SmartOrderExecutor,
    scheduler: AdvancedOrderScheduler,
    delta_hedging: DeltaHedgingEngine,
    gamma_scalping: GammaScalpingEngine,

    bus: EventBus,
    repository: Option<StateRepository>,
    autosave: AutoSave,
    monitor: MonitorState,

    account: Option<AccountData>,
    current_dt: DateTime<Local>,
    last_rollover_date: Option<NaiveDate>,
}

enum MonitorState {
    Disabled,
    Enabled(MonitorWriter),
}

impl StrategyEngine {
    pub fn new(
        config: AppConfig,
        gateway: Box<dyn TradingGateway>,
        services: ServiceBundle,
        deps: EngineDeps,
    ) -> Self {
        let autosave = AutoSave::new(
            config.strategy_name.clone(),
            config.persistence.auto_save_interval_seconds,
        );
        Self {
            risk: RiskAggregator::new(config.risk.thresholds),
            executor: SmartOrderExecutor::new(config.execution),
            scheduler: AdvancedOrderScheduler::new(),
            delta_hedging: DeltaHedgingEngine::new(config.hedging.clone()),
            gamma_scalping: GammaScalpingEngine::new(config.gamma_scalp.clone()),
            instruments: InstrumentAggregate::new(),
            positions: PositionAggregate::new(config.limits),
            bus: EventBus::new(),
            repository: deps.repository,
            autosave,
            monitor: match deps.monitor {
                Some(writer) => MonitorState::Enabled(writer),
                None => MonitorState::Disabled,
            },
            account: None,
            current_dt: Local::now(),
            last_rollover_date: None,
            services,
            gateway,
            config,
        }
    }

    /// Recover state from the newest snapshot. A missing archive starts
    /// empty; a corrupt one aborts startup.
    pub fn restore_state(&mut self) -> Result<bool, EngineError> {
        let Some(repository) = &self.repository else {
            return Ok(false);
        };
        match repository.load(&self.config.strategy_name)? {
            LoadOutcome::NotFound { strategy_name } => {
                tracing::info!(%strategy_name, "no archive; starting with empty aggregates");
                Ok(false)
            }
            LoadOutcome::Found(snapshot) => {
                let target: InstrumentSnapshot =
                    serde_json::from_value(snapshot["target_aggregate"].clone())
                        .map_err(|err| EngineError::SnapshotDecode(err.to_string()))?;
                let position: PositionSnapshot =
                    serde_json::from_value(snapshot["position_aggregate"].clone())
                        .map_err(|err| EngineError::SnapshotDecode(err.to_string()))?;
                self.instruments = InstrumentAggregate::from_snapshot(target);
                self.positions =
                    PositionAggregate::from_snapshot(position, self.config.limits);
                if let Some(dt) = markers::read_datetime(&snapshot["current_dt"]) {
                    self.current_dt = dt;
                }
                tracing::info!(
                    strategy = %self.config.strategy_name,
                    positions = self.positions.all_positions().len(),
                    "state restored from archive"
                );
                Ok(true)
            }
        }
    }

    /// External subscription hook for notifiers and dashboards.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    #[must_use]
    pub fn instruments(&self) -> &InstrumentAggregate {
        &self.instruments
    }

    #[must_use]
    pub fn positions(&self) -> &PositionAggregate {
        &self.positions
    }

    #[must_use]
    pub fn scheduler(&self) -> &AdvancedOrderScheduler {
        &self.scheduler
    }

    // ---- per-bar flow ----

    /// Handle one batch of window bars (all symbols, one timestamp).
    pub fn on_window_bars(&mut self, bars: &[BarData]) {
        let Some(first) = bars.first() else { return };
        self.current_dt = first.datetime;
        self.positions.on_new_trading_day(trading_date(self.current_dt));

        // 1 + 2: market state and indicators.
        let mut updated: Vec<VtSymbol> = Vec::new();
        for bar in bars {
            match self.instruments.append_bar(bar.clone()) {
                Ok(()) => {
                    let instrument = self
                        .instruments
                        .get_mut(&bar.vt_symbol)
                        .expect("instrument just appended");
                    self.services.indicator.calculate_bar(instrument, bar);
                    updated.push(bar.vt_symbol.clone());
                }
                Err(err) => {
                    tracing::error!(
                        vt_symbol = %bar.vt_symbol,
                        bar_time = %bar.datetime,
                        error = %err,
                        "bar rejected"
                    );
                }
            }
        }

        // 3: rollover.
        self.run_rollover_check();

        // 4 + 5: close then open passes.
        for vt_symbol in &updated {
            self.run_close_pass(vt_symbol);
            self.run_open_pass(vt_symbol);
        }

        // 6: drain and publish domain events.
        self.publish_pending_events();

        // 7: auto-save and monitor snapshot.
        self.auto_save();
        self.write_monitor_snapshot();
    }

    /// Timer hook, called at >= 1 Hz: order timeouts, due child orders,
    /// hedging cadence is driven separately by the worker.
    pub fn on_timer(&mut self, now: DateTime<Local>) {
        let (cancel_ids, events) = self.executor.check_timeouts(now);
        for vt_orderid in &cancel_ids {
            self.gateway.cancel_order(vt_orderid);
        }
        for event in events {
            self.bus.publish(&event);
        }

        let due = self.scheduler.get_pending_children(now);
        for child in due {
            self.send_child_order(&child, now);
        }
    }

    /// Drain the gateway's queued events through the bar pipeline and the
    /// event handlers, in broker-arrival order.
    pub fn process_gateway_events(&mut self, pipeline: &mut crate::BarPipeline) {
        for event in self.gateway.poll_events() {
            match event {
                GatewayEvent::Tick(tick) => {
                    if let Some(bars) = pipeline.handle_tick(&tick) {
                        self.on_window_bars(&bars);
                    }
                }
                GatewayEvent::Bars(bars) => {
                    if let Some(window) = pipeline.handle_bars(bars) {
                        self.on_window_bars(&window);
                    }
                }
                other => self.on_gateway_event(other),
            }
        }
    }

    /// Apply one broker event to the aggregates and execution state.
    pub fn on_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Tick(_) => {}
            GatewayEvent::Bars(bars) => self.on_window_bars(&bars),
            GatewayEvent::Order(order) => {
                let was_timed_out = self
                    .executor
                    .managed_order(&order.vt_orderid)
                    .map(|m| m.timed_out)
                    .unwrap_or(false);
                self.positions.apply_order_update(&order);
                match order.status {
                    OrderStatus::AllTraded => self.executor.mark_filled(&order.vt_orderid),
                    OrderStatus::Cancelled => {
                        self.executor.mark_cancelled(&order.vt_orderid);
                        if was_timed_out {
                            self.resubmit_after_timeout(&order.vt_orderid, &order.vt_symbol);
                        }
                    }
                    OrderStatus::Rejected => {
                        self.executor.mark_cancelled(&order.vt_orderid);
                    }
                    _ => {}
                }
                self.publish_pending_events();
            }
            GatewayEvent::Trade(trade) => {
                self.positions.apply_trade(&trade);
                let events = self.scheduler.on_broker_fill(&trade.vt_orderid);
                for event in &events {
                    self.bus.publish(event);
                }
                self.publish_pending_events();
            }
            GatewayEvent::Position(position) => {
                self.positions
                    .reconcile_external_position(&position, self.current_dt);
                self.publish_pending_events();
            }
            GatewayEvent::Account(account) => {
                self.account = Some(account);
            }
        }
    }

    // ---- rollover ----

    /// Daily 14:50 dominant-contract check; idempotent per trading day.
    fn run_rollover_check(&mut self) {
        let (hour, minute) = ROLLOVER_CHECK_TIME;
        let trigger = NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time");
        if self.current_dt.time() < trigger {
            return;
        }
        let today = self.current_dt.date_naive();
        if self.last_rollover_date == Some(today) {
            return;
        }
        self.last_rollover_date = Some(today);

        let products = self.config.products.clone();
        for product in &products {
            let candidates: Vec<_> = self
                .gateway
                .get_contracts_by_product(product)
                .into_iter()
                .filter(|c| !c.is_option())
                .collect();
            let Some(dominant) = self
                .services
                .future_selector
                .select_dominant(&candidates, today)
            else {
                continue;
            };
            let current = self.instruments.active_contract(product).cloned();
            if current.as_deref() == Some(dominant.vt_symbol.as_str()) {
                continue;
            }

            self.gateway.subscribe(&dominant.vt_symbol);
            if let Some(old) = &current {
                self.gateway.unsubscribe(old);
            }
            self.instruments
                .set_active_contract(product.clone(), dominant.vt_symbol.clone());
            tracing::info!(
                %product,
                old = current.as_deref().unwrap_or("-"),
                new = %dominant.vt_symbol,
                "active contract rolled"
            );
            self.bus.publish(&DomainEvent::ActiveContractRolled {
                product: product.clone(),
                old_vt_symbol: current.unwrap_or_default(),
                new_vt_symbol: dominant.vt_symbol,
            });
        }
    }

    // ---- close / open passes ----

    fn run_close_pass(&mut self, vt_symbol: &str) {
        let owned = self.positions.positions_by_underlying(vt_symbol);
        for position in owned {
            let Some(instrument) = self.instruments.get(vt_symbol) else {
                continue;
            };
            let Some(signal) = self
                .services
                .signal
                .check_close_signal(instrument, &position)
            else {
                continue;
            };
            if self.positions.has_pending_close(&position) {
                tracing::debug!(vt_symbol = %position.vt_symbol, "close already pending");
                continue;
            }
            tracing::info!(vt_symbol = %position.vt_symbol, %signal, "close signal");
            self.bus.publish(&DomainEvent::SignalGenerated {
                vt_symbol: position.vt_symbol.clone(),
                signal: signal.clone(),
                reason: "close".into(),
            });

            let close_price = self
                .gateway
                .get_tick(&position.vt_symbol)
                .map(|t| if position.direction == voltra_core::Direction::Short {
                    t.ask_price_1
                } else {
                    t.bid_price_1
                })
                .filter(|p| *p > 0.0)
                .unwrap_or(position.open_price);
            let pending = self.positions.pending_close_volume(&position.vt_symbol);
            let Some(instruction) =
                self.services
                    .sizer
                    .calculate_exit(&position, pending, close_price, &signal)
            else {
                continue;
            };
            self.dispatch(instruction);
        }
    }

    fn run_open_pass(&mut self, vt_symbol: &str) {
        if !self
            .instruments
            .has_enough_data(vt_symbol, self.config.min_history_len)
        {
            return;
        }
        let Some(instrument) = self.instruments.get(vt_symbol) else {
            return;
        };
        let Some(signal) = self.services.signal.check_open_signal(instrument) else {
            return;
        };
        tracing::info!(vt_symbol, %signal, "open signal");
        self.bus.publish(&DomainEvent::SignalGenerated {
            vt_symbol: vt_symbol.to_string(),
            signal: signal.clone(),
            reason: "open".into(),
        });

        if self.config.risk.block_opens_on_breach && self.risk.in_breach() {
            tracing::warn!(vt_symbol, "open blocked: portfolio outside risk limits");
            return;
        }

        // (a) pick the trade target.
        let option_type = self.services.signal.option_type_for(&signal);
        let underlying_price = self.instruments.latest_price(vt_symbol);
        let chain = self.option_chain(vt_symbol);
        let Some(target) = self.services.option_selector.select_target_option(
            &chain,
            option_type,
            underlying_price,
            None,
        ) else {
            tracing::info!(vt_symbol, %signal, "no option qualified; open abandoned");
            return;
        };

        // (b) hard liquidity gate.
        let volume = self.config.sizing.open_volume;
        let (Some(tick), Some(contract)) = (
            self.gateway.get_tick(&target.vt_symbol),
            self.gateway.get_contract(&target.vt_symbol),
        ) else {
            tracing::warn!(vt_symbol = %target.vt_symbol, "no tick/contract; open abandoned");
            return;
        };
        if !check_liquidity(&tick, &contract, volume, &self.config.liquidity) {
            return;
        }

        // (c) pre-trade Greeks and portfolio risk.
        let Some(entry) = self.quote_greeks_entry(&target, volume, contract.size) else {
            tracing::warn!(vt_symbol = %target.vt_symbol, "greeks unavailable; open abandoned");
            return;
        };
        let position_check = self
            .risk
            .check_position_risk(&entry.greeks, volume, contract.size);
        if !position_check.passed {
            tracing::warn!(
                vt_symbol = %target.vt_symbol,
                reason = position_check.reason.as_deref().unwrap_or("-"),
                "position risk check failed"
            );
            return;
        }
        if self.would_breach_portfolio(&entry) {
            tracing::warn!(
                vt_symbol = %target.vt_symbol,
                "post-trade portfolio would exceed limits; open abandoned"
            );
            return;
        }

        // (d) size the open.
        let Some(account) = self.account.clone().or_else(|| self.gateway.get_balance()) else {
            tracing::warn!("no account snapshot; open abandoned");
            return;
        };
        let active = self.positions.active_positions();
        let ctx = SizingContext {
            vt_symbol: &target.vt_symbol,
            signal: &signal,
            contract_price: target.bid_price,
            direction: voltra_core::Direction::Short,
            account: &account,
            active_positions: &active,
            global_open_used: self.positions.global_daily_open_volume()
                + self.positions.pending_open_volume(None),
            contract_open_used: self.positions.daily_open_volume(&target.vt_symbol)
                + self.positions.pending_open_volume(Some(&target.vt_symbol)),
        };
        let Some(instruction) = self.services.sizer.calculate_open(&ctx) else {
            return;
        };

        // (e) dispatch, registering the position against its underlying.
        self.positions.create_position(
            target.vt_symbol.clone(),
            vt_symbol,
            signal,
            instruction.volume,
            instruction.direction,
            self.current_dt,
        );
        self.dispatch(instruction);
    }

    // ---- dispatch ----

    /// Send an instruction through the smart executor (or the scheduler for
    /// parent volumes above the iceberg threshold).
    pub fn dispatch(&mut self, instruction: OrderInstruction) {
        let policy = &self.config.advanced_orders;
        if policy.enabled && instruction.volume >= policy.iceberg_threshold {
            match self
                .scheduler
                .submit_iceberg(instruction.clone(), policy.batch_size)
            {
                Ok(order) => {
                    tracing::info!(
                        order_id = %order.order_id,
                        volume = instruction.volume,
                        "parent order handed to scheduler"
                    );
                    // Children go out on the next timer sweep.
                    return;
                }
                Err(err) => {
                    tracing::error!(error = %err, "scheduler refused parent; sending directly");
                }
            }
        }
        self.send_instruction(instruction, None);
    }

    fn send_instruction(
        &mut self,
        mut instruction: OrderInstruction,
        price_offset: Option<f64>,
    ) -> Vec<String> {
        let pricetick = self
            .gateway
            .get_contract(&instruction.vt_symbol)
            .map(|c| c.pricetick)
            .unwrap_or(0.0);
        if let Some(tick) = self.gateway.get_tick(&instruction.vt_symbol) {
            instruction.price = self.executor.adaptive_price(
                &instruction,
                tick.bid_price_1,
                tick.ask_price_1,
                pricetick,
            );
        }
        if let Some(offset) = price_offset {
            instruction.price += offset;
        }
        instruction.price = SmartOrderExecutor::round_to_tick(instruction.price, pricetick);

        self.bus.publish(&DomainEvent::OrderInstructionGenerated {
            vt_symbol: instruction.vt_symbol.clone(),
            direction: format!("{:?}", instruction.direction),
            offset: format!("{:?}", instruction.offset),
            volume: instruction.volume,
            price: instruction.price,
        });

        let requests = self.gateway.convert_order_request(&instruction, false, false);
        let mut order_ids = Vec::new();
        for request in requests {
            for vt_orderid in self.gateway.send_order(&request) {
                self.executor
                    .register(vt_orderid.clone(), request.clone(), self.current_dt);
                self.positions.record_order_submitted(TrackedOrder::submitted(
                    vt_orderid.clone(),
                    &request,
                    self.current_dt,
                ));
                order_ids.push(vt_orderid);
            }
        }
        if order_ids.is_empty() {
            tracing::warn!(
                vt_symbol = %instruction.vt_symbol,
                "gateway returned no order ids; instruction dropped"
            );
        }
        order_ids
    }

    fn send_child_order(&mut self, child: &ChildOrder, _now: DateTime<Local>) {
        let Some(parent) = self.scheduler.get_order(&child.parent_id) else {
            return;
        };
        let mut instruction = parent.request.instruction.clone();
        instruction.volume = child.volume;
        let offset = child.price_offset;
        let ids = self.send_instruction(instruction, Some(offset).filter(|o| o.abs() > 0.0));
        if let Some(vt_orderid) = ids.into_iter().next() {
            self.scheduler.mark_child_submitted(&child.child_id, vt_orderid);
        }
    }

    fn resubmit_after_timeout(&mut self, vt_orderid: &str, vt_symbol: &str) {
        let pricetick = self
            .gateway
            .get_contract(vt_symbol)
            .map(|c| c.pricetick)
            .unwrap_or(0.0);
        let previous = self
            .executor
            .managed_order(vt_orderid)
            .map(|m| (m.retry_count, m.original_price));
        match self.executor.prepare_retry(vt_orderid, pricetick) {
            RetryOutcome::Retry(instruction) => {
                let (retries, original_price) =
                    previous.map(|(r, p)| (r + 1, p)).unwrap_or((1, instruction.price));
                let requests = self.gateway.convert_order_request(&instruction, false, false);
                for request in requests {
                    for new_id in self.gateway.send_order(&request) {
                        self.executor.register_retry(
                            new_id.clone(),
                            request.clone(),
                            retries,
                            original_price,
                            self.current_dt,
                        );
                        self.positions.record_order_submitted(TrackedOrder::submitted(
                            new_id,
                            &request,
                            self.current_dt,
                        ));
                    }
                }
            }
            RetryOutcome::Exhausted(event) => self.bus.publish(&event),
            RetryOutcome::NotManaged => {}
        }
    }

    // ---- greeks / hedging ----

    /// IV-derived Greeks entry for a quoted option.
    fn quote_greeks_entry(
        &self,
        quote: &OptionQuote,
        volume: i64,
        multiplier: f64,
    ) -> Option<PositionGreeksEntry> {
        let spot = self.instruments.latest_price(&quote.underlying_vt_symbol);
        if spot <= 0.0 {
            return None;
        }
        let tte = (quote.days_to_expiry.max(0) as f64) / 365.0;
        let mid = 0.5 * (quote.bid_price + quote.ask_price);
        let iv = implied_volatility(
            mid,
            spot,
            quote.strike_price,
            tte,
            RISK_FREE_RATE,
            quote.option_type,
            &IvConfig::default(),
        )
        .ok()?;
        let greeks = greeks(&BsParams {
            spot,
            strike: quote.strike_price,
            time_to_expiry: tte,
            rate: RISK_FREE_RATE,
            volatility: iv.implied_vol,
            option_type: quote.option_type,
        })
        .ok()?;
        Some(PositionGreeksEntry {
            vt_symbol: quote.vt_symbol.clone(),
            greeks,
            volume,
            multiplier,
            // Sell-side opens subtract exposure.
            direction_sign: -1.0,
        })
    }

    /// Greeks entries for every active position, skipping positions whose
    /// market data cannot support a solve.
    fn position_greeks_entries(&self) -> Vec<PositionGreeksEntry> {
        let mut entries = Vec::new();
        for position in self.positions.active_positions() {
            let Some(contract) = self.gateway.get_contract(&position.vt_symbol) else {
                continue;
            };
            let Some(meta) = contract.option.clone() else {
                continue;
            };
            let Some(tick) = self.gateway.get_tick(&position.vt_symbol) else {
                continue;
            };
            let quote = OptionQuote {
                vt_symbol: position.vt_symbol.clone(),
                underlying_vt_symbol: meta.underlying_vt_symbol.clone(),
                option_type: meta.option_type,
                strike_price: meta.strike_price,
                days_to_expiry: (meta.expiry - self.current_dt.date_naive()).num_days(),
                bid_price: tick.bid_price_1,
                bid_volume: tick.bid_volume_1 as i64,
                ask_price: tick.ask_price_1,
                ask_volume: tick.ask_volume_1 as i64,
                otm_depth: 0.0,
            };
            match self.quote_greeks_entry(&quote, position.volume, contract.size) {
                Some(mut entry) => {
                    entry.direction_sign = position.direction.sign();
                    entries.push(entry);
                }
                None => tracing::warn!(
                    vt_symbol = %position.vt_symbol,
                    "greeks solve failed; position excluded from aggregation"
                ),
            }
        }
        entries
    }

    /// Would adding `candidate` push any portfolio greek over its limit?
    fn would_breach_portfolio(&self, candidate: &PositionGreeksEntry) -> bool {
        let mut entries = self.position_greeks_entries();
        entries.push(candidate.clone());
        let mut delta = 0.0;
        let mut gamma = 0.0;
        let mut vega = 0.0;
        for entry in &entries {
            let weight = entry.volume as f64 * entry.multiplier * entry.direction_sign;
            delta += entry.greeks.delta * weight;
            gamma += entry.greeks.gamma * weight;
            vega += entry.greeks.vega * weight;
        }
        let thresholds = self.risk.thresholds();
        delta.abs() > thresholds.portfolio_delta_limit
            || gamma.abs() > thresholds.portfolio_gamma_limit
            || vega.abs() > thresholds.portfolio_vega_limit
    }

    /// Aggregate portfolio Greeks, publish breach events, and run the
    /// hedging engines. Called by the worker on its hedging cadence.
    pub fn run_hedging_cycle(&mut self) -> PortfolioGreeks {
        let entries = self.position_greeks_entries();
        let (totals, breach_events) = self.risk.aggregate_portfolio_greeks(&entries);
        for event in &breach_events {
            self.bus.publish(event);
        }

        let hedge_symbol = self.config.hedging.hedge_instrument_vt_symbol.clone();
        if !hedge_symbol.is_empty() {
            let price = self.instruments.latest_price(&hedge_symbol);
            let (result, events) = self.delta_hedging.check_and_hedge(&totals, price);
            for event in &events {
                self.bus.publish(event);
            }
            if let Some(instruction) = result.instruction {
                self.dispatch(instruction);
            }
        }

        let scalp_symbol = self.config.gamma_scalp.hedge_instrument_vt_symbol.clone();
        if !scalp_symbol.is_empty() {
            let price = self.instruments.latest_price(&scalp_symbol);
            let (result, events) = self.gamma_scalping.check_and_rebalance(&totals, price);
            for event in &events {
                self.bus.publish(event);
            }
            if let Some(instruction) = result.instruction {
                self.dispatch(instruction);
            }
        }

        totals
    }

    /// Build a vol surface from the live option chain of one underlying.
    pub fn vol_surface_for(&self, underlying_vt_symbol: &str) -> Option<VolSurface> {
        let spot = self.instruments.latest_price(underlying_vt_symbol);
        if spot <= 0.0 {
            return None;
        }
        let today = self.current_dt.date_naive();
        let mut quotes = Vec::new();
        for contract in self.gateway.get_all_contracts() {
            let Some(meta) = &contract.option else { continue };
            if meta.underlying_vt_symbol != underlying_vt_symbol {
                continue;
            }
            let Some(tick) = self.gateway.get_tick(&contract.vt_symbol) else {
                continue;
            };
            let mid = 0.5 * (tick.bid_price_1 + tick.ask_price_1);
            let tte = ((meta.expiry - today).num_days().max(0) as f64) / 365.0;
            if let Ok(solution) = implied_volatility(
                mid,
                spot,
                meta.strike_price,
                tte,
                RISK_FREE_RATE,
                meta.option_type,
                &IvConfig::default(),
            ) {
                quotes.push(VolQuote {
                    strike: meta.strike_price,
                    time_to_expiry: tte,
                    implied_vol: solution.implied_vol,
                });
            }
        }
        VolSurface::build(&quotes).ok()
    }

    /// Theoretical value helper used by quoting and dashboards.
    pub fn theoretical_price(&self, params: &BsParams) -> Option<f64> {
        bs_price(params).ok()
    }

    // ---- option chain ----

    fn option_chain(&self, underlying_vt_symbol: &str) -> Vec<OptionQuote> {
        let today = self.current_dt.date_naive();
        let mut chain = Vec::new();
        for contract in self.gateway.get_all_contracts() {
            let Some(meta) = &contract.option else { continue };
            if meta.underlying_vt_symbol != underlying_vt_symbol {
                continue;
            }
            let Some(tick) = self.gateway.get_tick(&contract.vt_symbol) else {
                continue;
            };
            chain.push(OptionQuote {
                vt_symbol: contract.vt_symbol.clone(),
                underlying_vt_symbol: meta.underlying_vt_symbol.clone(),
                option_type: meta.option_type,
                strike_price: meta.strike_price,
                days_to_expiry: (meta.expiry - today).num_days(),
                bid_price: tick.bid_price_1,
                bid_volume: tick.bid_volume_1 as i64,
                ask_price: tick.ask_price_1,
                ask_volume: tick.ask_volume_1 as i64,
                otm_depth: 0.0,
            });
        }
        chain
    }

    // ---- events / persistence / monitor ----

    fn publish_pending_events(&mut self) {
        let events = self.positions.pop_domain_events();
        for event in &events {
            self.bus.publish(event);
            if let MonitorState::Enabled(writer) = &self.monitor {
                let payload = serde_json::to_value(event).unwrap_or(json!({}));
                writer.record_event(
                    event.vt_symbol().unwrap_or(""),
                    Some(self.current_dt),
                    event.name(),
                    "",
                    &payload,
                    Local::now(),
                );
            }
        }
    }

    fn build_snapshot(&self) -> serde_json::Value {
        let target = serde_json::to_value(self.instruments.snapshot()).unwrap_or(json!({}));
        let position = serde_json::to_value(self.positions.snapshot()).unwrap_or(json!({}));
        JsonSerializer::build_snapshot(target, position, self.current_dt)
    }

    fn auto_save(&mut self) {
        let Some(repository) = &self.repository else { return };
        let snapshot = self.build_snapshot();
        self.autosave.maybe_save(repository, || snapshot);
    }

    /// Unconditional save, used on shutdown.
    pub fn force_save(&mut self) {
        let Some(repository) = &self.repository else { return };
        let snapshot = self.build_snapshot();
        self.autosave.force_save(repository, || snapshot);
    }

    /// Ranked OTM candidates per active underlying, for the dashboard.
    fn otm_chain_report(&self) -> serde_json::Value {
        let mut report = serde_json::Map::new();
        for underlying in self.instruments.all_active_contracts() {
            let spot = self.instruments.latest_price(&underlying);
            if spot <= 0.0 {
                continue;
            }
            let chain = self.option_chain(&underlying);
            let mut sides = serde_json::Map::new();
            for (label, option_type) in [("puts", OptionType::Put), ("calls", OptionType::Call)] {
                let ranked: Vec<VtSymbol> = self
                    .services
                    .option_selector
                    .all_otm_options(&chain, option_type, spot)
                    .into_iter()
                    .map(|quote| quote.vt_symbol)
                    .collect();
                sides.insert(label.to_string(), json!(ranked));
            }
            report.insert(underlying, serde_json::Value::Object(sides));
        }
        serde_json::Value::Object(report)
    }

    fn write_monitor_snapshot(&self) {
        let MonitorState::Enabled(writer) = &self.monitor else {
            return;
        };
        let payload = json!({
            "active_positions": self.positions.active_positions().len(),
            "pending_orders": self.positions.all_pending_orders().len(),
            "global_daily_open": self.positions.global_daily_open_volume(),
            "active_contracts": self.instruments.all_active_contracts(),
            "in_breach": self.risk.in_breach(),
            "otm_chain": self.otm_chain_report(),
        });
        writer.write_snapshot(&payload, Some(self.current_dt), Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_session_maps_to_the_calendar_date() {
        let dt = Local.with_ymd_and_hms(2025, 1, 10, 10, 30, 0).unwrap();
        assert_eq!(
            trading_date(dt),
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
        );
    }

    #[test]
    fn night_session_belongs_to_the_next_weekday() {
        // Friday 21:05 trades into Monday.
        let friday_night = Local.with_ymd_and_hms(2025, 1, 10, 21, 5, 0).unwrap();
        assert_eq!(
            trading_date(friday_night),
            NaiveDate::from_ymd_opt(2025, 1, 13).unwrap()
        );

        let tuesday_night = Local.with_ymd_and_hms(2025, 1, 7, 21, 5, 0).unwrap();
        assert_eq!(
            trading_date(tuesday_night),
            NaiveDate::from_ymd_opt(2025, 1, 8).unwrap()
        );
    }
}
