//! Whole-scan scenarios: real workers, real queues, scripted modules.

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    config::ScanConfig,
    error::EngineError,
    events::{EmitRequest, Event, event_type},
    module::{FilterVerdict, Module as _},
    modules::{MemorySink, ParentDomains, UrlHosts},
    report::{ScanOutcome, ScanReport, ScanStatus},
    scan::Scan,
    scope::Target,
    testing::ScriptedModule,
};

fn emits_dns(name: &str, from: &'static str, to: &'static str, tag: &'static str) -> ScriptedModule {
    ScriptedModule::new(name)
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::DNS_NAME])
        .on_event(move |event, ctx| {
            if event.data_str() == Some(from) {
                ctx.emit(event, EmitRequest::new(event_type::DNS_NAME, to).tag(tag))?;
            }
            Ok(())
        })
}

fn http_fetch() -> ScriptedModule {
    ScriptedModule::new("http-fetch")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::URL])
        .filter(|event| {
            if event.is_seed() {
                FilterVerdict::reject("only fetches discovered hosts")
            } else {
                FilterVerdict::Accept
            }
        })
        .on_event(|event, ctx| {
            let host = event.data_str().unwrap_or_default();
            ctx.emit(
                event,
                EmitRequest::new(event_type::URL, format!("https://{host}/")).tag("http-fetch"),
            )?;
            Ok(())
        })
}

fn strict(seeds: &[&str]) -> Target {
    Target::builder(seeds.iter().copied())
        .strict_scope(true)
        .build()
        .unwrap()
}

fn config(max_scope_distance: u32) -> ScanConfig {
    ScanConfig {
        max_scope_distance,
        ..ScanConfig::default()
    }
}

fn assert_graph_integrity(report: &ScanReport) {
    let by_id: HashMap<&str, &Event> = report
        .graph
        .iter()
        .map(|r| (r.event.id(), r.event.as_ref()))
        .collect();

    for record in &report.graph {
        let event = &record.event;
        for chain in record.all_chains() {
            assert!(
                !chain.iter().any(|id| id == event.id()),
                "{} appears in its own chain",
                event.id()
            );
        }
        if let Some(parent_id) = event.parent() {
            assert_eq!(event.parent_chain().last().map(String::as_str), Some(parent_id));
            let parent = by_id[parent_id];
            assert_eq!(event.parent_chain().len(), parent.parent_chain().len() + 1);
            assert!(
                event.reseeded() || event.scope_distance() >= parent.scope_distance(),
                "{} got closer to scope without a reseed",
                event.id()
            );
        } else {
            assert!(event.parent_chain().is_empty());
        }
    }
}

#[tokio::test]
async fn seed_to_url_chain_is_recorded_with_provenance() {
    let sink = MemorySink::new();
    let report = Scan::new(config(1), strict(&["example.com"]))
        .unwrap()
        .with_module(emits_dns("subdomains", "example.com", "www.example.com", "subdomain"))
        .with_module(http_fetch())
        .with_module(sink.clone())
        .run()
        .await
        .unwrap();

    assert!(report.succeeded(), "{:?}", report.status);
    assert_eq!(sink.event_count(), 3);

    let seed = sink.find(event_type::DNS_NAME, "example.com").unwrap();
    let www = sink.find(event_type::DNS_NAME, "www.example.com").unwrap();
    let url = sink.find(event_type::URL, "https://www.example.com/").unwrap();

    assert_eq!(seed.scope_distance(), 0);
    assert_eq!(www.scope_distance(), 1);
    assert_eq!(url.scope_distance(), 1);
    assert_eq!(seed.parent_chain().len(), 0);
    assert_eq!(www.parent_chain().len(), 1);
    assert_eq!(url.parent_chain().len(), 2);
    assert_eq!(url.parent_chain(), [seed.id(), www.id()]);
    assert!(url.has_tag("http-fetch"));
    assert!(seed.has_tag("seed"));

    let scans = sink.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].status, "FINISHED");
    assert!(scans[0].finished_at.is_some());
    assert_eq!(sink.targets().len(), 1);

    assert_eq!(report.module_stats["http-fetch"].filtered, 1);
    assert_graph_integrity(&report);
}

#[tokio::test]
async fn same_host_from_two_parents_is_handled_once_downstream() {
    let fetch = http_fetch();
    let fetch_seen = fetch.seen();
    let report = Scan::new(config(1), strict(&["example.com", "mail.example.com"]))
        .unwrap()
        .with_module(emits_dns("subdomains", "example.com", "www.example.com", "subdomain"))
        .with_module(emits_dns("bruteforce", "mail.example.com", "www.example.com", "brute"))
        .with_module(fetch)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(fetch_seen.invocations(), 1);
    assert_eq!(report.stats.duplicates, 1);

    let www = report.find(event_type::DNS_NAME, "www.example.com").unwrap();
    assert_eq!(www.all_chains().count(), 2);
    assert_eq!(www.alternate_paths.len(), 1);
    assert!(www.tags.contains("subdomain") && www.tags.contains("brute"));
    assert_eq!(report.events_of_type(event_type::URL).count(), 1);
}

#[tokio::test]
async fn always_failing_module_does_not_stop_the_scan() {
    let broken = ScriptedModule::new("broken")
        .watching(&[event_type::DNS_NAME])
        .on_event(|event, _ctx| anyhow::bail!("cannot resolve {}", event.data()));
    let broken_seen = broken.seen();
    let panicky = ScriptedModule::new("panicky")
        .watching(&[event_type::IP_ADDRESS])
        .on_event(|_event, _ctx| panic!("boom"));
    let resolver = ScriptedModule::new("resolver")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::IP_ADDRESS])
        .on_event(|event, ctx| {
            let octet = event.data_str().map_or(0, str::len);
            ctx.emit(event, EmitRequest::new(event_type::IP_ADDRESS, format!("10.0.0.{octet}")))?;
            Ok(())
        });

    let report = Scan::new(config(1), Target::new(["a.com", "bb.com", "ccc.com"]).unwrap())
        .unwrap()
        .with_module(broken)
        .with_module(panicky)
        .with_module(resolver)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(broken_seen.invocations(), 3);
    assert_eq!(report.module_stats["broken"].failed, 3);
    assert_eq!(report.module_stats["broken"].handled, 0);
    assert_eq!(report.module_stats["resolver"].handled, 3);
    assert_eq!(report.module_stats["panicky"].failed, 3);
    assert_eq!(report.events_of_type(event_type::IP_ADDRESS).count(), 3);

    let summary = report.failure_summary().unwrap();
    assert!(summary.contains("broken: 3 of 3 invocations failed"));
    assert!(summary.contains("boom"));
}

#[tokio::test]
async fn saturated_module_loses_nothing() {
    let fanout = ScriptedModule::new("fanout")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::RAW_TEXT])
        .on_event(|event, ctx| {
            for i in 0..100 {
                ctx.emit(event, EmitRequest::new(event_type::RAW_TEXT, format!("item-{i}")))?;
            }
            Ok(())
        });
    let slow = ScriptedModule::new("slow")
        .watching(&[event_type::RAW_TEXT])
        .concurrency(1)
        .delay(Duration::from_millis(1));
    let slow_seen = slow.seen();

    let cfg = ScanConfig {
        queue_high_water: 4,
        backpressure_timeout_ms: 5,
        ..ScanConfig::default()
    };
    let report = Scan::new(cfg, Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(fanout)
        .with_module(slow)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(slow_seen.invocations(), 100);
    assert_eq!(report.module_stats["slow"].handled, 100);
    assert_eq!(report.module_stats["slow"].queued, 100);

    // FIFO within the module
    let seen: Vec<String> = slow_seen
        .handled()
        .iter()
        .filter_map(|e| e.data_str().map(str::to_string))
        .collect();
    let expected: Vec<String> = (0..100).map(|i| format!("item-{i}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn blacklisted_discoveries_are_never_routed() {
    let emitter = ScriptedModule::new("emitter")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::DNS_NAME])
        .on_event(|event, ctx| {
            if event.is_seed() {
                ctx.emit(event, EmitRequest::new(event_type::DNS_NAME, "db.internal.example.com"))?;
                ctx.emit(event, EmitRequest::new(event_type::DNS_NAME, "www.example.com"))?;
            }
            Ok(())
        });
    let watcher = ScriptedModule::new("watcher").watching(&[event_type::DNS_NAME]);
    let watcher_seen = watcher.seen();

    let target = Target::builder(["example.com"])
        .blacklist(["internal.example.com"])
        .build()
        .unwrap();
    let report = Scan::new(ScanConfig::default(), target)
        .unwrap()
        .with_module(emitter)
        .with_module(watcher)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.stats.blacklisted, 1);
    assert!(report.find(event_type::DNS_NAME, "db.internal.example.com").is_none());
    let mut seen: Vec<String> = watcher_seen
        .handled()
        .iter()
        .filter_map(|e| e.data_str().map(str::to_string))
        .collect();
    seen.sort();
    assert_eq!(seen, ["example.com", "www.example.com"]);
}

#[tokio::test]
async fn rediscovered_ancestor_does_not_loop() {
    let echo = ScriptedModule::new("echo")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::DNS_NAME])
        .on_event(|event, ctx| {
            ctx.emit(event, EmitRequest::new(event_type::DNS_NAME, event.data().clone()))?;
            Ok(())
        });
    let echo_seen = echo.seen();

    let report = Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(echo)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(echo_seen.invocations(), 1);
    assert_eq!(report.stats.back_edges, 1);
    assert_eq!(report.events_of_type(event_type::DNS_NAME).count(), 1);
}

#[tokio::test]
async fn distance_window_follows_the_module_modifier() {
    let hop = emits_dns("hop", "example.com", "other.net", "hop");
    let near = ScriptedModule::new("near").watching(&[event_type::DNS_NAME]);
    let far = ScriptedModule::new("far")
        .watching(&[event_type::DNS_NAME])
        .distance_modifier(1);
    let (near_seen, far_seen) = (near.seen(), far.seen());

    let report = Scan::new(config(0), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(hop)
        .with_module(near)
        .with_module(far)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    let other = report.find(event_type::DNS_NAME, "other.net").unwrap();
    assert_eq!(other.event.scope_distance(), 1);
    assert_eq!(near_seen.invocations(), 1);
    assert_eq!(far_seen.invocations(), 2);
}

#[tokio::test]
async fn events_past_every_window_are_recorded_but_not_routed() {
    let hop = emits_dns("hop", "example.com", "other.net", "hop");
    let report = Scan::new(config(0), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(hop)
        .run()
        .await
        .unwrap();

    assert!(report.find(event_type::DNS_NAME, "other.net").is_some());
    assert_eq!(report.stats.distance_capped, 1);
    assert_eq!(report.module_stats["hop"].handled, 1);
}

#[tokio::test]
async fn per_module_dedup_key_collapses_equivalent_inputs() {
    let subs = ScriptedModule::new("subs")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::DNS_NAME])
        .on_event(|event, ctx| {
            if event.is_seed() {
                for sub in ["a.example.com", "b.example.com", "c.example.com"] {
                    ctx.emit(event, EmitRequest::new(event_type::DNS_NAME, sub))?;
                }
            }
            Ok(())
        });
    // one call per registrable domain
    let zone = ScriptedModule::new("zone")
        .watching(&[event_type::DNS_NAME])
        .dedup_key(|event| {
            let host = event.data_str()?;
            let labels: Vec<&str> = host.rsplitn(3, '.').take(2).collect();
            Some(labels.join("."))
        });
    let zone_seen = zone.seen();

    let report = Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(subs)
        .with_module(zone)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(zone_seen.invocations(), 1);
    assert_eq!(report.module_stats["zone"].deduped, 3);
}

#[tokio::test]
async fn setup_failure_disables_only_that_module() {
    let broken = ScriptedModule::new("broken")
        .watching(&[event_type::DNS_NAME])
        .failing_setup();
    let broken_seen = broken.seen();
    let fine = ScriptedModule::new("fine").watching(&[event_type::DNS_NAME]);
    let fine_seen = fine.seen();

    let report = Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(broken)
        .with_module(fine)
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(broken_seen.setups(), 1);
    assert_eq!(broken_seen.invocations(), 0);
    assert_eq!(broken_seen.teardowns(), 0);
    assert_eq!(fine_seen.invocations(), 1);
    assert_eq!(fine_seen.teardowns(), 1);
    assert!(
        report.module_stats["broken"]
            .setup_error
            .as_deref()
            .is_some_and(|e| e.contains("refused to start"))
    );
}

#[tokio::test]
async fn cancellation_aborts_in_flight_handlers() {
    let stuck = ScriptedModule::new("stuck")
        .watching(&[event_type::DNS_NAME])
        .delay(Duration::from_secs(3600));
    let stuck_seen = stuck.seen();

    let scan = Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(stuck);
    let cancel = scan.cancel_token();
    let status = scan.subscribe_status();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let report = tokio::time::timeout(Duration::from_secs(10), scan.run())
        .await
        .expect("cancelled scan must not hang")
        .unwrap();

    assert_eq!(report.status, ScanStatus::Finished(ScanOutcome::Aborted));
    assert_eq!(*status.borrow(), ScanStatus::Finished(ScanOutcome::Aborted));
    assert_eq!(stuck_seen.invocations(), 1);
    assert_eq!(stuck_seen.teardowns(), 1);
    assert_eq!(report.module_stats["stuck"].handled, 0);
}

fn final_scan_record(report: &ScanReport) -> Option<String> {
    report
        .events_of_type(event_type::SCAN)
        .filter_map(|r| r.event.data()["status"].as_str().map(str::to_string))
        .find(|status| status != "RUNNING")
}

#[tokio::test]
async fn aborted_scan_still_reaches_the_sinks_with_its_final_status() {
    let stuck = ScriptedModule::new("stuck")
        .watching(&[event_type::DNS_NAME])
        .delay(Duration::from_secs(3600));
    let sink = MemorySink::new();

    let scan = Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(stuck)
        .with_module(sink.clone());
    let cancel = scan.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let report = tokio::time::timeout(Duration::from_secs(10), scan.run())
        .await
        .expect("cancelled scan must not hang")
        .unwrap();

    assert_eq!(report.status, ScanStatus::Finished(ScanOutcome::Aborted));
    let scans = sink.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].status, "ABORTED");
    assert!(scans[0].finished_at.is_some());
    assert!(scans[0].duration.is_some());
    assert_eq!(final_scan_record(&report).as_deref(), Some("ABORTED"));
    assert_eq!(report.module_stats["memory"].failed, 0);
}

#[tokio::test]
async fn failed_scan_still_reaches_the_sinks_with_its_final_status() {
    // emits below a parent the store never saw, which breaks the graph
    let haunted = ScriptedModule::new("haunted")
        .watching(&[event_type::DNS_NAME])
        .producing(&[event_type::DNS_NAME])
        .on_event(|_event, ctx| {
            let lost = Event::create(
                EmitRequest::new(event_type::DNS_NAME, "lost.example.com"),
                None,
                "ghost",
                0,
                ctx.scan_id(),
            )?;
            let below = Arc::new(Event::create(
                EmitRequest::new(event_type::DNS_NAME, "x.lost.example.com"),
                Some(&lost),
                "ghost",
                1,
                ctx.scan_id(),
            )?);
            ctx.emit(&below, EmitRequest::new(event_type::DNS_NAME, "lost.example.com"))?;
            Ok(())
        });
    let sink = MemorySink::new();

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
            .unwrap()
            .with_module(haunted)
            .with_module(sink.clone())
            .run(),
    )
    .await
    .expect("failed scan must not hang")
    .unwrap();

    assert!(matches!(report.status, ScanStatus::Finished(ScanOutcome::Failed { .. })));
    assert_eq!(report.stats.cycles, 1);
    let scans = sink.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].status, "FAILED");
    assert!(scans[0].finished_at.is_some());
    assert_eq!(final_scan_record(&report).as_deref(), Some("FAILED"));
}

#[tokio::test]
async fn panicking_dedup_key_fails_only_that_delivery() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    // panics while the bus is routing
    let fragile = ScriptedModule::new("fragile")
        .watching(&[event_type::DNS_NAME])
        .dedup_key(|event| {
            if event.data_str() == Some("www.example.com") {
                panic!("no key for {}", event.id());
            }
            Some(event.id().to_string())
        });
    // panics later, in the worker's claim
    let calls = Arc::new(AtomicUsize::new(0));
    let late = ScriptedModule::new("late")
        .watching(&[event_type::DNS_NAME])
        .dedup_key(move |event| {
            if event.data_str() == Some("www.example.com") && calls.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("key lost");
            }
            Some(event.id().to_string())
        });
    let (fragile_seen, late_seen) = (fragile.seen(), late.seen());

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        Scan::new(config(1), strict(&["example.com"]))
            .unwrap()
            .with_module(emits_dns("subdomains", "example.com", "www.example.com", "subdomain"))
            .with_module(fragile)
            .with_module(late)
            .run(),
    )
    .await
    .expect("a panicking key must not stall the scan")
    .unwrap();

    assert!(report.succeeded());
    assert!(report.find(event_type::DNS_NAME, "www.example.com").is_some());
    for (name, seen) in [("fragile", &fragile_seen), ("late", &late_seen)] {
        let stats = &report.module_stats[name];
        assert_eq!(seen.invocations(), 1, "{name}");
        assert_eq!(stats.handled, 1, "{name}");
        assert_eq!(stats.failed, 1, "{name}");
        assert!(
            stats
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("incoming_dedup_key panicked")),
            "{name}: {:?}",
            stats.last_error
        );
    }
    assert_graph_integrity(&report);
}

#[tokio::test]
async fn duplicate_module_names_fail_before_anything_runs() {
    let a = ScriptedModule::new("dup").watching(&[event_type::DNS_NAME]);
    let b = ScriptedModule::new("dup").watching(&[event_type::URL]);
    let a_seen = a.seen();

    let err = Scan::new(ScanConfig::default(), Target::new(["example.com"]).unwrap())
        .unwrap()
        .with_module(a)
        .with_module(b)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DuplicateModule { name } if name == "dup"));
    assert_eq!(a_seen.setups(), 0);
}

#[tokio::test]
async fn builtin_producers_walk_from_url_to_parent_domain() {
    let sink = MemorySink::new();
    let report = Scan::new(ScanConfig::default(), Target::new(["https://a.b.example.com/login"]).unwrap())
        .unwrap()
        .with_module(UrlHosts)
        .with_module(ParentDomains)
        .with_module(sink.clone())
        .run()
        .await
        .unwrap();

    assert!(report.succeeded());
    let host = sink.find(event_type::DNS_NAME, "a.b.example.com").unwrap();
    assert_eq!(host.scope_distance(), 0);
    // distance 1 is past every window: recorded, but neither stored nor walked further
    let parent = &report.find(event_type::DNS_NAME, "b.example.com").unwrap().event;
    assert_eq!(parent.scope_distance(), 1);
    assert!(parent.has_tag("parent-domain"));
    assert!(sink.find(event_type::DNS_NAME, "b.example.com").is_none());
    assert!(report.find(event_type::DNS_NAME, "example.com").is_none());
    assert_eq!(report.stats.distance_capped, 1);
}

const RANDOM_TYPES: [&str; 4] = [
    event_type::DNS_NAME,
    event_type::IP_ADDRESS,
    event_type::URL,
    event_type::RAW_TEXT,
];

fn bucket(id: &str, salt: u64) -> u64 {
    id.bytes()
        .fold(salt, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
        % 6
}

fn random_payload(kind: &str, k: u64) -> String {
    let domain = if k % 2 == 0 { "example.com" } else { "other.net" };
    match kind {
        event_type::DNS_NAME => format!("h{k}.{domain}"),
        event_type::IP_ADDRESS => format!("10.0.0.{k}"),
        event_type::URL => format!("https://h{k}.{domain}/"),
        _ => format!("text-{k}"),
    }
}

/// Every module watches one type and emits two of them, so recursion
/// across (and into) modules is the norm. Payloads come from a small
/// finite space, which makes convergence depend on the global dedup tier.
fn random_module(rng: &mut fastrand::Rng, index: usize) -> ScriptedModule {
    let watched = RANDOM_TYPES[rng.usize(..RANDOM_TYPES.len())];
    let outputs = [
        RANDOM_TYPES[rng.usize(..RANDOM_TYPES.len())],
        RANDOM_TYPES[rng.usize(..RANDOM_TYPES.len())],
    ];
    let salt = rng.u64(..);
    let reseeds = rng.u8(..) < 20;

    ScriptedModule::new(format!("m{index}"))
        .watching(&[watched])
        .producing(&outputs)
        .concurrency(rng.usize(1..4))
        .on_event(move |event, ctx| {
            for (n, kind) in outputs.iter().enumerate() {
                let k = bucket(event.id(), salt.wrapping_add(n as u64));
                let mut request = EmitRequest::new(*kind, random_payload(kind, k));
                if reseeds && k == 0 {
                    request = request.reseed();
                }
                ctx.emit(event, request)?;
            }
            Ok(())
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_module_graphs_stay_acyclic_and_deduplicated() {
    for seed in 0..12 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let modules: Vec<ScriptedModule> = (0..rng.usize(2..6))
            .map(|i| random_module(&mut rng, i))
            .collect();
        let observed: Vec<_> = modules.iter().map(|m| (m.seen(), m.name().to_string())).collect();

        let mut scan = Scan::new(config(3), Target::new(["h0.example.com"]).unwrap()).unwrap();
        for module in modules {
            scan.add_module(Arc::new(module));
        }
        let report = tokio::time::timeout(Duration::from_secs(30), scan.run())
            .await
            .expect("random graph must converge")
            .unwrap();

        assert!(report.succeeded(), "seed {seed}: {:?}", report.status);
        assert_graph_integrity(&report);

        for (seen, name) in observed {
            let mut ids = seen.handled_ids();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), total, "seed {seed}: {name} handled an input twice");
            assert_eq!(report.module_stats[&name].handled as usize, total);
        }
    }
}
