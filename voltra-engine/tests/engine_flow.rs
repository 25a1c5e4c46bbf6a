//! End-to-end engine flow tests against the simulated gateway: rollover,
//! option opens, fills, manual-intervention reconciliation, timeout retry,
//! hedging and state recovery.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use rusqlite::Connection;

use voltra_config::AppConfig;
use voltra_core::{
    BarData, ContractData, Direction, Exchange, Offset, OptionMeta, OptionType, OrderData,
    OrderInstruction, OrderStatus, PositionData, TickData, TradeData,
};
use voltra_domain::Instrument;
use voltra_engine::{EngineDeps, StrategyEngine};
use voltra_events::DomainEvent;
use voltra_gateway::{GatewayEvent, SimGateway, TradingGateway};
use voltra_persistence::StateRepository;
use voltra_services::{
    FutureSelector, IndicatorService, OptionSelector, PositionSizingService, ServiceBundle,
    SignalService,
};

// ---- scripted services ----

struct NoopIndicator;

impl IndicatorService for NoopIndicator {
    fn calculate_bar(&mut self, _instrument: &mut Instrument, _bar: &BarData) {}
}

#[derive(Default)]
struct ScriptedSignal {
    open_signals: Rc<RefCell<Vec<String>>>,
    close_signals: Rc<RefCell<Vec<String>>>,
}

impl SignalService for ScriptedSignal {
    fn check_open_signal(&mut self, _instrument: &Instrument) -> Option<String> {
        self.open_signals.borrow_mut().pop()
    }

    fn check_close_signal(
        &mut self,
        _instrument: &Instrument,
        _position: &voltra_domain::Position,
    ) -> Option<String> {
        self.close_signals.borrow_mut().pop()
    }
}

struct Script {
    open: Rc<RefCell<Vec<String>>>,
    close: Rc<RefCell<Vec<String>>>,
}

fn scripted_services() -> (ServiceBundle, Script) {
    let open = Rc::new(RefCell::new(Vec::new()));
    let close = Rc::new(RefCell::new(Vec::new()));
    let bundle = ServiceBundle {
        indicator: Box::new(NoopIndicator),
        signal: Box::new(ScriptedSignal {
            open_signals: Rc::clone(&open),
            close_signals: Rc::clone(&close),
        }),
        sizer: Box::new(PositionSizingService::default()),
        future_selector: Box::new(FutureSelector::default()),
        option_selector: Box::new(OptionSelector::default()),
    };
    (
        bundle,
        Script {
            open,
            close,
        },
    )
}

// ---- market fixtures ----

const UNDERLYING: &str = "rb2505.SHFE";

fn at(h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 1, 10, h, m, 0).unwrap()
}

fn future_contract(symbol: &str) -> ContractData {
    ContractData {
        vt_symbol: format!("{symbol}.SHFE"),
        symbol: symbol.into(),
        exchange: Exchange::Shfe,
        product: "rb".into(),
        name: symbol.into(),
        size: 10.0,
        pricetick: 1.0,
        option: None,
    }
}

fn put_contract(strike: f64) -> ContractData {
    let symbol = format!("rb2505P{strike:.0}");
    ContractData {
        vt_symbol: format!("{symbol}.SHFE"),
        symbol,
        exchange: Exchange::Shfe,
        product: "rb".into(),
        name: "put".into(),
        size: 10.0,
        pricetick: 1.0,
        option: Some(OptionMeta {
            strike_price: strike,
            expiry: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
            underlying_vt_symbol: UNDERLYING.into(),
            option_type: OptionType::Put,
        }),
    }
}

fn tick_for(vt_symbol: &str, bid: f64, ask: f64) -> TickData {
    TickData {
        vt_symbol: vt_symbol.into(),
        datetime: at(10, 0),
        last_price: 0.5 * (bid + ask),
        volume: 5000.0,
        bid_price_1: bid,
        bid_volume_1: 50.0,
        ask_price_1: ask,
        ask_volume_1: 50.0,
    }
}

fn bar_at(vt_symbol: &str, datetime: DateTime<Local>, close: f64) -> BarData {
    BarData {
        vt_symbol: vt_symbol.into(),
        datetime,
        open: close,
        high: close,
        low: close,
        close,
        volume: 100.0,
    }
}

fn market_gateway() -> SimGateway {
    let mut gateway = SimGateway::new();
    gateway.connect(60.0).unwrap();
    gateway.add_contract(future_contract("rb2501"));
    gateway.add_contract(future_contract("rb2505"));
    for strike in [3900.0, 3800.0, 3700.0] {
        gateway.add_contract(put_contract(strike));
    }
    gateway.set_tick(tick_for(UNDERLYING, 3999.0, 4001.0));
    gateway.set_tick(tick_for("rb2505P3900.SHFE", 95.0, 97.0));
    gateway.set_tick(tick_for("rb2505P3800.SHFE", 62.0, 64.0));
    gateway.set_tick(tick_for("rb2505P3700.SHFE", 38.0, 40.0));
    gateway.set_account(voltra_core::AccountData {
        accountid: "sim".into(),
        balance: 1_000_000.0,
        frozen: 0.0,
    });
    gateway
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.products = vec!["rb".into()];
    config.min_history_len = 1;
    config
}

fn collect_events(engine: &mut StrategyEngine) -> Rc<RefCell<Vec<DomainEvent>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    engine
        .bus_mut()
        .subscribe_all(move |event| sink.borrow_mut().push(event.clone()));
    seen
}

fn fill_pending_order(engine: &mut StrategyEngine, vt_orderid: &str) {
    let order = engine
        .positions()
        .pending_order(vt_orderid)
        .expect("pending order exists")
        .clone();
    engine.on_gateway_event(GatewayEvent::Trade(TradeData {
        vt_tradeid: format!("t-{vt_orderid}"),
        vt_orderid: vt_orderid.into(),
        vt_symbol: order.vt_symbol.clone(),
        direction: order.direction,
        offset: order.offset,
        volume: order.volume,
        price: order.price,
        datetime: at(10, 1),
    }));
    engine.on_gateway_event(GatewayEvent::Order(OrderData {
        vt_orderid: vt_orderid.into(),
        vt_symbol: order.vt_symbol,
        direction: order.direction,
        offset: order.offset,
        volume: order.volume,
        traded: order.volume,
        status: OrderStatus::AllTraded,
        price: order.price,
        datetime: at(10, 1),
    }));
}

// ---- tests ----

#[test]
fn s3_rollover_picks_the_next_contract_inside_seven_days() {
    let (services, _script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );
    let events = collect_events(&mut engine);

    // 2025-01-10, five days before rb2501's estimated expiry.
    engine.on_window_bars(&[bar_at(UNDERLYING, at(14, 50), 4000.0)]);
    assert_eq!(
        engine.instruments().active_contract("rb").map(String::as_str),
        Some("rb2505.SHFE")
    );
    let rolls = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, DomainEvent::ActiveContractRolled { .. }))
        .count();
    assert_eq!(rolls, 1);
}

#[test]
fn rollover_is_idempotent_within_a_day() {
    let (services, _script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );
    let events = collect_events(&mut engine);

    engine.on_window_bars(&[bar_at(UNDERLYING, at(14, 50), 4000.0)]);
    engine.on_window_bars(&[bar_at(UNDERLYING, at(14, 51), 4001.0)]);
    engine.on_window_bars(&[bar_at(UNDERLYING, at(14, 55), 4002.0)]);

    let rolls = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, DomainEvent::ActiveContractRolled { .. }))
        .count();
    assert_eq!(rolls, 1, "at most one subscribe/unsubscribe pair per day");
}

#[test]
fn open_signal_selects_the_third_otm_put_and_dispatches() {
    let (services, script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );
    script.open.borrow_mut().push("sell_put_test".into());

    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);

    let pending = engine.positions().all_pending_orders();
    assert_eq!(pending.len(), 1);
    let order = &pending[0];
    // Default strike level 3: the most OTM of the three quoted puts.
    assert_eq!(order.vt_symbol, "rb2505P3700.SHFE");
    assert_eq!(order.direction, Direction::Short);
    assert_eq!(order.offset, Offset::Open);
    assert_eq!(order.volume, 1);
    // Adaptive pricing bit through the bid by the slippage budget.
    assert!(order.price <= 38.0);

    let position = engine.positions().get_position("rb2505P3700.SHFE").unwrap();
    assert_eq!(position.underlying_vt_symbol, UNDERLYING);
    assert_eq!(position.signal, "sell_put_test");
    assert_eq!(position.volume, 0);

    // Fill it and the position becomes active.
    let vt_orderid = pending[0].vt_orderid.clone();
    fill_pending_order(&mut engine, &vt_orderid);
    let position = engine.positions().get_position("rb2505P3700.SHFE").unwrap();
    assert_eq!(position.volume, 1);
    assert!(engine.positions().all_pending_orders().is_empty());
}

#[test]
fn open_abandoned_when_no_option_qualifies() {
    let (services, script) = scripted_services();
    let mut gateway = market_gateway();
    // Thin books: every put fails the chain liquidity filter.
    for strike in [3900.0, 3800.0, 3700.0] {
        let symbol = format!("rb2505P{strike:.0}.SHFE");
        let mut tick = tick_for(&symbol, 38.0, 40.0);
        tick.bid_volume_1 = 1.0;
        gateway.set_tick(tick);
    }
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(gateway),
        services,
        EngineDeps::none(),
    );
    script.open.borrow_mut().push("sell_put_test".into());

    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);
    assert!(engine.positions().all_pending_orders().is_empty());
    assert!(engine.positions().all_positions().is_empty());
}

#[test]
fn close_signal_dispatches_an_exit_once() {
    let (services, script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );

    script.open.borrow_mut().push("sell_put_test".into());
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);
    let open_id = engine.positions().all_pending_orders()[0].vt_orderid.clone();
    fill_pending_order(&mut engine, &open_id);

    script.close.borrow_mut().push("close_test".into());
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 15), 3990.0)]);

    let pending = engine.positions().all_pending_orders();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].offset, Offset::Close);
    assert_eq!(pending[0].direction, Direction::Long);
    assert_eq!(pending[0].vt_symbol, "rb2505P3700.SHFE");

    // Another close signal while the first is pending: no duplicate order.
    script.close.borrow_mut().push("close_test".into());
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 30), 3985.0)]);
    assert_eq!(engine.positions().all_pending_orders().len(), 1);
}

#[test]
fn manual_close_is_detected_and_published() {
    let (services, script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );
    let events = collect_events(&mut engine);

    script.open.borrow_mut().push("sell_put_test".into());
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);
    let open_id = engine.positions().all_pending_orders()[0].vt_orderid.clone();
    fill_pending_order(&mut engine, &open_id);

    engine.on_gateway_event(GatewayEvent::Position(PositionData {
        vt_symbol: "rb2505P3700.SHFE".into(),
        direction: Direction::Short,
        volume: 0,
        frozen: 0,
        price: 39.0,
    }));

    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, DomainEvent::ManualCloseDetected { volume: 1, .. })));
    let position = engine.positions().get_position("rb2505P3700.SHFE").unwrap();
    assert!(position.is_manually_closed);
}

#[test]
fn timed_out_order_is_cancelled_and_repriced() {
    let (services, _script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );
    let events = collect_events(&mut engine);

    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);
    engine.dispatch(OrderInstruction::limit(
        "rb2505P3700.SHFE",
        Direction::Short,
        Offset::Open,
        1,
        38.0,
        "manual_test",
    ));
    let first = engine.positions().all_pending_orders()[0].clone();

    // Past the timeout: the engine asks the broker to cancel.
    engine.on_timer(at(10, 0) + Duration::seconds(11));
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, DomainEvent::OrderTimeout { .. })));

    // Broker confirms the cancel; a re-priced replacement goes out.
    engine.on_gateway_event(GatewayEvent::Order(OrderData {
        vt_orderid: first.vt_orderid.clone(),
        vt_symbol: first.vt_symbol.clone(),
        direction: first.direction,
        offset: first.offset,
        volume: first.volume,
        traded: 0,
        status: OrderStatus::Cancelled,
        price: first.price,
        datetime: at(10, 1),
    }));

    let pending = engine.positions().all_pending_orders();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].vt_orderid, first.vt_orderid);
    // Short retry walks the price down one tick.
    assert!(pending[0].price < first.price);
}

#[test]
fn hedging_cycle_hedges_drifted_delta() {
    let (services, script) = scripted_services();
    let mut config = test_config();
    config.hedging.hedge_instrument_vt_symbol = UNDERLYING.into();
    config.hedging.hedging_band = 0.5;
    config.hedging.hedge_instrument_delta = 1.0;
    config.hedging.hedge_instrument_multiplier = 1.0;

    let mut engine = StrategyEngine::new(
        config,
        Box::new(market_gateway()),
        services,
        EngineDeps::none(),
    );
    let events = collect_events(&mut engine);

    script.open.borrow_mut().push("sell_put_test".into());
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);
    let open_id = engine.positions().all_pending_orders()[0].vt_orderid.clone();
    fill_pending_order(&mut engine, &open_id);

    let totals = engine.run_hedging_cycle();
    // Short one put: positive residual delta.
    assert!(totals.total_delta > 0.0);
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, DomainEvent::HedgeExecuted { .. })));
    let hedge = engine
        .positions()
        .all_pending_orders()
        .into_iter()
        .find(|o| o.vt_symbol == UNDERLYING)
        .expect("hedge order pending");
    assert_eq!(hedge.signal, "delta_hedge");
    assert_eq!(hedge.direction, Direction::Short);
}

#[test]
fn state_round_trips_through_the_repository() {
    let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let (services, script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps {
            repository: Some(StateRepository::new(Arc::clone(&conn)).unwrap()),
            monitor: None,
        },
    );

    script.open.borrow_mut().push("sell_put_test".into());
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);
    let open_id = engine.positions().all_pending_orders()[0].vt_orderid.clone();
    fill_pending_order(&mut engine, &open_id);
    engine.force_save();

    let (services, _script) = scripted_services();
    let mut recovered = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps {
            repository: Some(StateRepository::new(conn).unwrap()),
            monitor: None,
        },
    );
    assert!(recovered.restore_state().unwrap());
    let position = recovered
        .positions()
        .get_position("rb2505P3700.SHFE")
        .expect("position recovered");
    assert_eq!(position.volume, 1);
    assert_eq!(position.signal, "sell_put_test");
    assert_eq!(
        recovered.instruments().latest_price(UNDERLYING),
        4000.0
    );
}

#[test]
fn fresh_start_when_no_archive_exists() {
    let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let (services, _script) = scripted_services();
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(market_gateway()),
        services,
        EngineDeps {
            repository: Some(StateRepository::new(conn).unwrap()),
            monitor: None,
        },
    );
    assert!(!engine.restore_state().unwrap());
    assert!(engine.positions().all_positions().is_empty());
}

#[test]
fn vol_surface_builds_from_the_live_chain() {
    let (services, _script) = scripted_services();
    let mut gateway = market_gateway();
    // A second expiry so the surface has two rows.
    for strike in [3900.0, 3800.0, 3700.0] {
        let mut contract = put_contract(strike);
        contract.vt_symbol = format!("rb2505P{strike:.0}F.SHFE");
        contract.option.as_mut().unwrap().expiry = NaiveDate::from_ymd_opt(2025, 3, 30).unwrap();
        let tick = tick_for(&contract.vt_symbol.clone(), 70.0 + (4000.0 - strike) * 0.2, 72.0 + (4000.0 - strike) * 0.2);
        gateway.add_contract(contract);
        gateway.set_tick(tick);
    }
    let mut engine = StrategyEngine::new(
        test_config(),
        Box::new(gateway),
        services,
        EngineDeps::none(),
    );
    engine.on_window_bars(&[bar_at(UNDERLYING, at(10, 0), 4000.0)]);

    let surface = engine.vol_surface_for(UNDERLYING).expect("surface built");
    assert_eq!(surface.strikes().len(), 3);
    assert_eq!(surface.expiries().len(), 2);
    let mid_strike = surface.strikes()[1];
    let mid_expiry = 0.5 * (surface.expiries()[0] + surface.expiries()[1]);
    assert!(surface.query(mid_strike, mid_expiry).unwrap() > 0.0);
}
