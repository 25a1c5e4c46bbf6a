//! In-memory gateway for engine and worker tests: scripted market data,
//! immediate-fill order handling and controllable connectivity.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};

use voltra_core::{
    AccountData, BarData, ContractData, Direction, Interval, OrderData, OrderInstruction,
    OrderStatus, PositionData, QuoteRequest, TickData, TradeData, VtOrderId,
};

use crate::{warn_disconnected, GatewayError, GatewayEvent, SubscriptionSet, TradingGateway};

/// Scripted broker double.
///
/// Orders are acknowledged immediately; tests decide when (and whether)
/// fills happen by pushing events. All sent instructions are recorded for
/// assertions.
#[derive(Default)]
pub struct SimGateway {
    connected: bool,
    /// When set, `connect` fails regardless of the timeout.
    pub refuse_connect: bool,
    subscriptions: SubscriptionSet,
    next_order_id: u64,
    pub sent_orders: Vec<(VtOrderId, OrderInstruction)>,
    pub cancelled_orders: Vec<VtOrderId>,
    contracts: HashMap<String, ContractData>,
    ticks: HashMap<String, TickData>,
    positions: HashMap<(String, Direction), PositionData>,
    account: Option<AccountData>,
    history: HashMap<String, Vec<BarData>>,
    event_queue: VecDeque<GatewayEvent>,
    /// Auto-fill sent orders by queuing trade + order events.
    pub auto_fill: bool,
}

impl SimGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_contract(&mut self, contract: ContractData) {
        self.contracts.insert(contract.vt_symbol.clone(), contract);
    }

    pub fn set_tick(&mut self, tick: TickData) {
        self.ticks.insert(tick.vt_symbol.clone(), tick);
    }

    pub fn set_account(&mut self, account: AccountData) {
        self.account = Some(account);
    }

    pub fn set_position(&mut self, position: PositionData) {
        self.positions
            .insert((position.vt_symbol.clone(), position.direction), position);
    }

    pub fn set_history(&mut self, vt_symbol: &str, bars: Vec<BarData>) {
        self.history.insert(vt_symbol.to_string(), bars);
    }

    pub fn push_event(&mut self, event: GatewayEvent) {
        self.event_queue.push_back(event);
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    fn fill_immediately(&mut self, vt_orderid: &str, instruction: &OrderInstruction) {
        let now = Local::now();
        self.event_queue.push_back(GatewayEvent::Trade(TradeData {
            vt_tradeid: format!("trade.{vt_orderid}"),
            vt_orderid: vt_orderid.to_string(),
            vt_symbol: instruction.vt_symbol.clone(),
            direction: instruction.direction,
            offset: instruction.offset,
            volume: instruction.volume,
            price: instruction.price,
            datetime: now,
        }));
        self.event_queue.push_back(GatewayEvent::Order(OrderData {
            vt_orderid: vt_orderid.to_string(),
            vt_symbol: instruction.vt_symbol.clone(),
            direction: instruction.direction,
            offset: instruction.offset,
            volume: instruction.volume,
            traded: instruction.volume,
            status: OrderStatus::AllTraded,
            price: instruction.price,
            datetime: now,
        }));
    }
}

impl TradingGateway for SimGateway {
    fn connect(&mut self, timeout_seconds: f64) -> Result<(), GatewayError> {
        if self.refuse_connect {
            return Err(GatewayError::ConnectTimeout(timeout_seconds));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, vt_symbol: &str) {
        self.subscriptions.add(vt_symbol);
    }

    fn unsubscribe(&mut self, vt_symbol: &str) {
        self.subscriptions.remove(vt_symbol);
    }

    fn send_order(&mut self, instruction: &OrderInstruction) -> Vec<VtOrderId> {
        if !self.connected {
            warn_disconnected("send_order");
            return Vec::new();
        }
        self.next_order_id += 1;
        let vt_orderid = format!("sim.{}", self.next_order_id);
        self.sent_orders
            .push((vt_orderid.clone(), instruction.clone()));
        if self.auto_fill {
            self.fill_immediately(&vt_orderid, instruction);
        }
        vec![vt_orderid]
    }

    fn cancel_order(&mut self, vt_orderid: &str) {
        if !self.connected {
            warn_disconnected("cancel_order");
            return;
        }
        self.cancelled_orders.push(vt_orderid.to_string());
    }

    fn cancel_all_orders(&mut self) {
        let open: Vec<VtOrderId> = self
            .sent_orders
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| !self.cancelled_orders.contains(id))
            .collect();
        self.cancelled_orders.extend(open);
    }

    fn convert_order_request(
        &self,
        instruction: &OrderInstruction,
        _lock: bool,
        _net: bool,
    ) -> Vec<OrderInstruction> {
        // The sim has no today/yesterday bookkeeping; pass through unchanged.
        vec![instruction.clone()]
    }

    fn send_quote(&mut self, quote: &QuoteRequest) -> Option<String> {
        if !self.connected {
            warn_disconnected("send_quote");
            return None;
        }
        self.next_order_id += 1;
        Some(format!("simquote.{}.{}", quote.vt_symbol, self.next_order_id))
    }

    fn cancel_quote(&mut self, _vt_quoteid: &str) {}

    fn get_tick(&self, vt_symbol: &str) -> Option<TickData> {
        if !self.connected {
            warn_disconnected("get_tick");
            return None;
        }
        self.ticks.get(vt_symbol).cloned()
    }

    fn get_contract(&self, vt_symbol: &str) -> Option<ContractData> {
        self.contracts.get(vt_symbol).cloned()
    }

    fn get_all_contracts(&self) -> Vec<ContractData> {
        self.contracts.values().cloned().collect()
    }

    fn get_contracts_by_product(&self, product: &str) -> Vec<ContractData> {
        self.contracts
            .values()
            .filter(|c| c.product == product)
            .cloned()
            .collect()
    }

    fn get_contracts_by_exchange(&self, exchange: &str) -> Vec<ContractData> {
        self.contracts
            .values()
            .filter(|c| c.exchange.as_str() == exchange)
            .cloned()
            .collect()
    }

    fn get_balance(&self) -> Option<AccountData> {
        if !self.connected {
            warn_disconnected("get_balance");
            return None;
        }
        self.account.clone()
    }

    fn get_position(&self, vt_symbol: &str, direction: Direction) -> Option<PositionData> {
        self.positions
            .get(&(vt_symbol.to_string(), direction))
            .cloned()
    }

    fn get_all_positions(&self) -> Vec<PositionData> {
        self.positions.values().cloned().collect()
    }

    fn query_history(
        &self,
        vt_symbol: &str,
        _interval: Interval,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Vec<BarData> {
        if !self.connected {
            warn_disconnected("query_history");
            return Vec::new();
        }
        self.history
            .get(vt_symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.datetime >= start && b.datetime <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn poll_events(&mut self) -> Vec<GatewayEvent> {
        self.event_queue.drain(..).collect()
    }
}
