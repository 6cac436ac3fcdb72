use candid::{candid_method, Principal};
use ic_canister_log::log;
use ic_canisters_http_types::{HttpRequest, HttpResponse, HttpResponseBuilder};
use ic_cdk_macros::{init, post_upgrade, query, update};
use tick_ledger::event::{self, Event};
use tick_ledger::logs::INFO;
use tick_ledger::numeric::to_f64;
use tick_ledger::state::{read_state, replace_state, validate_impaired_threshold, State};
use tick_ledger::state::mutate_state;
use tick_ledger::storage::events;
use tick_ledger::{
    GetEventsArg, LedgerArg, LedgerError, LedgerStatus, NodeInfo, RedeemSuccess,
    RedemptionAvailability, RedemptionAvailableArg, RestoreArg, SourceArg, SourceResult, UseArg,
    SEC_NANOS,
};
use candid_parser::utils::CandidSource;
use candid_parser::utils::service_equal;

#[cfg(feature = "self_check")]
fn ok_or_die(result: Result<(), String>) {
    if let Err(msg) = result {
        ic_cdk::println!("{}", msg);
        ic_cdk::trap(&msg);
    }
}

/// Checks that the ledger state is internally consistent and matches its event log.
#[cfg(feature = "self_check")]
fn check_invariants() -> Result<(), String> {
    use tick_ledger::event::replay;

    read_state(|s| {
        s.check_invariants()?;

        let events: Vec<_> = tick_ledger::storage::events().collect();
        let recovered_state = replay(events.clone().into_iter())
            .unwrap_or_else(|e| panic!("failed to replay log {:?}: {:?}", events, e));

        recovered_state.check_invariants()?;
        s.check_semantically_eq(&recovered_state)?;

        Ok(())
    })
}

fn check_postcondition<T>(t: T) -> T {
    #[cfg(feature = "self_check")]
    ok_or_die(check_invariants());
    t
}

fn validate_call() -> Result<(), LedgerError> {
    if ic_cdk::caller() == Principal::anonymous() {
        return Err(LedgerError::AnonymousCallerNotAllowed);
    }
    Ok(())
}

fn validate_mode() -> Result<(), LedgerError> {
    if read_state(|s| s.mode.is_available()) {
        return Ok(());
    }
    Err(LedgerError::TemporarilyUnavailable(
        "ledger temporarily unavailable, please wait for an upgrade".to_string(),
    ))
}

/// Current time in seconds.
fn now() -> u64 {
    ic_cdk::api::time() / SEC_NANOS
}

fn main() {}

#[candid_method(init)]
#[init]
fn init(arg: LedgerArg) {
    match arg {
        LedgerArg::Init(init_arg) => {
            if let Err(msg) = validate_impaired_threshold(init_arg.impaired_threshold_bps) {
                ic_cdk::trap(&msg);
            }
            log!(
                INFO,
                "[init] initialized tick ledger with args: {:?}",
                init_arg
            );
            tick_ledger::storage::record_event(&Event::Init(init_arg.clone()));
            replace_state(State::from(init_arg));
        }
        LedgerArg::Upgrade(_) => ic_cdk::trap("expected Init got Upgrade"),
    }
}

#[post_upgrade]
fn post_upgrade(arg: LedgerArg) {
    use tick_ledger::event::replay;
    use tick_ledger::storage::{count_events, record_event};

    let start = ic_cdk::api::instruction_counter();

    log!(INFO, "[upgrade]: replaying {} events", count_events());

    match arg {
        LedgerArg::Init(_) => ic_cdk::trap("expected Upgrade got Init"),
        LedgerArg::Upgrade(upgrade_args) => {
            if let Err(msg) = validate_impaired_threshold(upgrade_args.impaired_threshold_bps) {
                ic_cdk::trap(&msg);
            }
            log!(
                INFO,
                "[upgrade]: updating configuration with {:?}",
                upgrade_args
            );
            record_event(&Event::Upgrade(upgrade_args));
        }
    }

    let state = replay(events()).unwrap_or_else(|e| {
        ic_cdk::trap(&format!(
            "[upgrade]: failed to replay the event log: {:?}",
            e
        ))
    });

    replace_state(state);

    let end = ic_cdk::api::instruction_counter();

    log!(
        INFO,
        "[upgrade]: replaying events consumed {} instructions",
        end - start
    );
}

#[candid_method(update)]
#[update]
fn deposit(tick: u128, amount: u128) -> Result<u128, LedgerError> {
    validate_call()?;
    validate_mode()?;
    check_postcondition(mutate_state(|s| event::record_deposit(s, tick, amount, now())))
}

#[candid_method(update)]
#[update]
fn redeem(tick: u128, shares: u128) -> Result<RedeemSuccess, LedgerError> {
    validate_call()?;
    validate_mode()?;
    check_postcondition(mutate_state(|s| event::record_redeem(s, tick, shares, now())))
}

#[candid_method(update)]
#[update]
fn use_liquidity(arg: UseArg) -> Result<(), LedgerError> {
    validate_call()?;
    validate_mode()?;
    check_postcondition(mutate_state(|s| {
        event::record_use_liquidity(s, arg.tick, arg.used, arg.pending, arg.duration, now())
    }))
}

#[candid_method(update)]
#[update]
fn restore(arg: RestoreArg) -> Result<(), LedgerError> {
    validate_call()?;
    validate_mode()?;
    check_postcondition(mutate_state(|s| {
        event::record_restore(
            s,
            arg.tick,
            arg.used,
            arg.pending,
            arg.restored,
            arg.duration,
            arg.elapsed,
            now(),
        )
    }))
}

#[candid_method(query)]
#[query]
fn source(arg: SourceArg) -> Result<SourceResult, LedgerError> {
    read_state(|s| {
        s.liquidity.source(
            arg.amount,
            &arg.ticks,
            arg.multiplier,
            arg.duration_class,
            arg.reference_price,
        )
    })
}

#[candid_method(query)]
#[query]
fn redemption_available(arg: RedemptionAvailableArg) -> RedemptionAvailability {
    read_state(|s| {
        s.liquidity
            .redemption_available(arg.tick, arg.pending, arg.index, arg.target)
    })
}

#[candid_method(query)]
#[query]
fn get_node(tick: u128) -> NodeInfo {
    read_state(|s| s.liquidity.node_info(tick))
}

#[candid_method(query)]
#[query]
fn get_nodes_in_range(start: u128, end: u128) -> Vec<NodeInfo> {
    read_state(|s| s.liquidity.nodes_in_range(start, end))
}

#[candid_method(query)]
#[query]
fn deposit_share_price(tick: u128) -> u128 {
    read_state(|s| s.liquidity.deposit_share_price(tick, now()))
}

#[candid_method(query)]
#[query]
fn redemption_share_price(tick: u128) -> u128 {
    read_state(|s| s.liquidity.redemption_share_price(tick))
}

#[candid_method(query)]
#[query]
fn get_ledger_status() -> LedgerStatus {
    read_state(|s| s.status())
}

#[candid_method(query)]
#[query]
fn get_events(args: GetEventsArg) -> Vec<Event> {
    if ic_cdk::api::data_certificate().is_none() {
        ic_cdk::trap("update call rejected");
    }
    const MAX_EVENTS_PER_QUERY: usize = 2000;

    events()
        .skip(args.start as usize)
        .take(MAX_EVENTS_PER_QUERY.min(args.length as usize))
        .collect()
}

#[query]
fn http_request(req: HttpRequest) -> HttpResponse {
    use ic_metrics_encoder::MetricsEncoder;
    if ic_cdk::api::data_certificate().is_none() {
        ic_cdk::trap("update call rejected");
    }

    if req.path() == "/metrics" {
        let mut writer = MetricsEncoder::new(vec![], ic_cdk::api::time() as i64 / 1_000_000);

        fn encode_metrics(w: &mut MetricsEncoder<Vec<u8>>) -> std::io::Result<()> {
            read_state(|s| {
                w.gauge_vec("cycle_balance", "Cycle balance of this canister.")?
                    .value(
                        &[("canister", "tick-ledger")],
                        ic_cdk::api::canister_balance128() as f64,
                    )?;

                let status = s.status();

                w.encode_gauge(
                    "tick_ledger_active_node_count",
                    status.active_nodes as f64,
                    "Count of active liquidity nodes.",
                )?;

                w.encode_gauge(
                    "tick_ledger_total_value",
                    to_f64(status.total_value),
                    "Total value across all nodes.",
                )?;

                w.encode_gauge(
                    "tick_ledger_total_available",
                    to_f64(status.total_available),
                    "Total cash available across all nodes.",
                )?;

                w.encode_gauge(
                    "tick_ledger_total_pending",
                    to_f64(status.total_pending),
                    "Total repayments pending across all nodes.",
                )?;

                w.encode_gauge(
                    "tick_ledger_redemption_shares_pending",
                    to_f64(s.total_redemptions_pending()),
                    "Shares waiting in redemption queues.",
                )?;

                w.encode_gauge(
                    "tick_ledger_impaired_threshold_bps",
                    status.impaired_threshold_bps as f64,
                    "Share price in basis points below which a node is impaired.",
                )?;

                w.encode_gauge(
                    "tick_ledger_event_count",
                    tick_ledger::storage::count_events() as f64,
                    "Number of events in the ledger event log.",
                )?;

                Ok(())
            })
        }

        match encode_metrics(&mut writer) {
            Ok(()) => HttpResponseBuilder::ok()
                .header("Content-Type", "text/plain; version=0.0.4")
                .with_body_and_content_length(writer.into_inner())
                .build(),
            Err(err) => {
                HttpResponseBuilder::server_error(format!("Failed to encode metrics: {}", err))
                    .build()
            }
        }
    } else if req.path() == "/logs" {
        use std::str::FromStr;
        use tick_ledger::logs::{Log, Priority};

        let max_skip_timestamp = match req.raw_query_param("time") {
            Some(arg) => match u64::from_str(arg) {
                Ok(value) => value,
                Err(_) => {
                    return HttpResponseBuilder::bad_request()
                        .with_body_and_content_length("failed to parse the 'time' parameter")
                        .build()
                }
            },
            None => 0,
        };

        let mut entries: Log = Default::default();

        match req.raw_query_param("priority") {
            Some(priority_str) => match Priority::from_str(priority_str) {
                Ok(priority) => entries.push_logs(priority),
                Err(_) => entries.push_all(),
            },
            None => entries.push_all(),
        }

        // Truncate bytes to avoid having more than 2MB response.
        let entries_bytes = entries.serialize_logs(max_skip_timestamp, 1_900_000);

        HttpResponseBuilder::ok()
            .header("Content-Type", "application/json; charset=utf-8")
            .with_body_and_content_length(entries_bytes)
            .build()
    } else {
        HttpResponseBuilder::not_found().build()
    }
}

// Checks the real candid interface against the one declared in the did file
#[test]
fn check_candid_interface_compatibility() {
    fn source_to_str(source: &CandidSource) -> String {
        match source {
            CandidSource::File(f) => {
                std::fs::read_to_string(f).unwrap_or_else(|_| "".to_string())
            }
            CandidSource::Text(t) => t.to_string(),
        }
    }

    fn check_service_compatible(
        new_name: &str,
        new: CandidSource,
        old_name: &str,
        old: CandidSource,
    ) {
        let new_str = source_to_str(&new);
        let old_str = source_to_str(&old);
        match service_equal(new, old) {
            Ok(_) => {}
            Err(e) => {
                eprintln!(
                    "{} is not compatible with {}!\n\n\
            {}:\n\
            {}\n\n\
            {}:\n\
            {}\n",
                    new_name, old_name, new_name, new_str, old_name, old_str
                );
                panic!("{:?}", e);
            }
        }
    }

    candid::export_service!();

    let new_interface = __export_service();

    // check the public interface against the actual one
    let old_interface = std::path::PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap())
        .join("tick_ledger.did");

    check_service_compatible(
        "actual tick ledger candid interface",
        CandidSource::Text(&new_interface),
        "declared candid interface in tick_ledger.did file",
        CandidSource::File(old_interface.as_path()),
    );
}
