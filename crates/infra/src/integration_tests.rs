//! Integration tests across the four services on the in-memory store.
//!
//! Verifies:
//! - Holds never exceed stock under concurrent reservation and allocation
//! - Stock is conserved across order create/update/delete
//! - Confirm debits exactly once, lapsed reservations never debit
//! - Stale order writes are detected by version

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use curtainworks_catalog::{
        Design, DesignMaterialLine, MaterialColor, MaterialReference, MaterialType,
    };
    use curtainworks_core::{
        AggregateRoot, Clock, ColorId, DesignId, DomainError, ExpectedVersion, LedgerEntryId,
        ManualClock, MaterialTypeId, ReferenceId,
    };
    use curtainworks_events::{InMemoryEventBus, NotificationEnvelope};
    use curtainworks_inventory::NewLedgerEntry;
    use curtainworks_orders::{OrderPatch, OrderStatus};

    use crate::allocation::{NewCurtainOrder, OrderAllocationCoordinator};
    use crate::catalog::InMemoryCatalog;
    use crate::ledger::StockLedger;
    use crate::reservations::ReservationManager;
    use crate::retry::RetryPolicy;
    use crate::store::{InMemoryInventoryStore, InventoryStore, OrderWrite, StoreError};

    type Store = Arc<InMemoryInventoryStore>;
    type Bus = Arc<InMemoryEventBus<NotificationEnvelope>>;

    struct Plant {
        ledger: StockLedger<Store, Bus>,
        reservations: Arc<ReservationManager<Store, Bus>>,
        orders: Arc<OrderAllocationCoordinator<Store, Arc<InMemoryCatalog>, Bus>>,
        store: Store,
        clock: Arc<ManualClock>,
        design_id: DesignId,
        entry_id: LedgerEntryId,
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
    }

    /// One fabric (100 on hand, minimum 20, 12.50/m) and design SHEER using
    /// 2.2 m of it per meter of width.
    fn plant() -> Plant {
        let store: Store = Arc::new(InMemoryInventoryStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(ManualClock::new(test_time()));

        let fabric = MaterialType::new(MaterialTypeId::new(), "Fabric").unwrap();
        let voile = MaterialReference::new(
            ReferenceId::new(),
            fabric.id,
            "VOI-07",
            "Voile",
            Decimal::new(1250, 2),
        )
        .unwrap();
        let ivory = MaterialColor::new(ColorId::new(), voile.id, "IVR", "Ivory").unwrap();
        let design = Design::new(DesignId::new(), "SHEER", "Sheer panel", Decimal::from(45))
            .unwrap()
            .with_line(
                DesignMaterialLine::new(fabric.id, Decimal::new(22, 1))
                    .bound_to(voile.id, ivory.id),
            )
            .unwrap();
        let design_id = design.id_typed();

        catalog.add_material_type(fabric).unwrap();
        catalog.add_reference(voile.clone()).unwrap();
        catalog.add_color(ivory.clone()).unwrap();
        catalog.add_design(design).unwrap();

        let ledger = StockLedger::new(store.clone(), bus.clone(), clock.clone())
            .with_retry(RetryPolicy::no_retry());
        let entry_id = ledger
            .create(NewLedgerEntry {
                reference_id: voile.id,
                color_id: ivory.id,
                initial_quantity: Decimal::from(100),
                minimum_threshold: Decimal::from(20),
                location: Some("RACK-2".to_string()),
            })
            .unwrap()
            .id_typed();

        let reservations = Arc::new(
            ReservationManager::new(store.clone(), bus.clone(), clock.clone())
                .with_retry(RetryPolicy::no_retry()),
        );
        let orders = Arc::new(
            OrderAllocationCoordinator::new(store.clone(), catalog, bus, clock.clone())
                .with_retry(RetryPolicy::fixed(5, std::time::Duration::from_millis(1))),
        );

        Plant {
            ledger,
            reservations,
            orders,
            store,
            clock,
            design_id,
            entry_id,
        }
    }

    fn order_request(p: &Plant, width_cm: i64, multiplier: u32) -> NewCurtainOrder {
        NewCurtainOrder {
            design_id: p.design_id,
            width_cm: Decimal::from(width_cm),
            height_cm: Decimal::from(250),
            multiplier,
            split: false,
            notes: None,
            selections: Vec::new(),
        }
    }

    fn on_hand(p: &Plant) -> Decimal {
        p.ledger.get(p.entry_id).unwrap().quantity_on_hand()
    }

    fn allocated(p: &Plant) -> Decimal {
        p.orders
            .list_orders(None)
            .unwrap()
            .iter()
            .map(|o| o.allocated_from(p.entry_id))
            .sum()
    }

    #[test]
    fn concurrent_reservations_never_overbook() {
        let p = plant();
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let reservations = p.reservations.clone();
                let barrier = barrier.clone();
                let entry_id = p.entry_id;
                thread::spawn(move || {
                    barrier.wait();
                    reservations.reserve(&[(entry_id, Decimal::from(60))], None)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, DomainError::InsufficientStock(_))));
        assert_eq!(p.reservations.available(p.entry_id).unwrap(), Decimal::from(40));
        assert_eq!(on_hand(&p), Decimal::from(100));
    }

    #[test]
    fn concurrent_orders_never_oversell() {
        let p = plant();
        let contenders = 10;
        let barrier = Arc::new(Barrier::new(contenders));

        // each order draws 2.2 × 2 × 5 = 22
        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let orders = p.orders.clone();
                let barrier = barrier.clone();
                let request = order_request(&p, 200, 5);
                thread::spawn(move || {
                    barrier.wait();
                    orders.create_order(request)
                })
            })
            .collect();

        let placed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        assert_eq!(placed, 4);
        assert_eq!(on_hand(&p), Decimal::from(12));
        assert_eq!(allocated(&p), Decimal::from(88));
    }

    #[test]
    fn concurrent_confirms_debit_once() {
        let p = plant();
        let token = p
            .reservations
            .reserve(&[(p.entry_id, Decimal::from(30))], None)
            .unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let reservations = p.reservations.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    reservations.confirm(token)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DomainError::ReservationNotFound(t)) if *t == token)));
        assert_eq!(on_hand(&p), Decimal::from(70));
    }

    #[test]
    fn width_change_scenario() {
        let p = plant();

        let order = p.orders.create_order(order_request(&p, 150, 1)).unwrap();
        let entry = p.ledger.get(p.entry_id).unwrap();
        assert_eq!(entry.quantity_on_hand(), Decimal::new(967, 1));
        assert!(!entry.is_below_minimum());

        p.orders
            .update_order(
                order.id_typed(),
                OrderPatch {
                    width_cm: Some(Decimal::from(300)),
                    ..OrderPatch::default()
                },
            )
            .unwrap();
        assert_eq!(on_hand(&p), Decimal::new(934, 1));
    }

    #[test]
    fn lapsed_reservation_never_debits() {
        let p = plant();
        let token = p
            .reservations
            .reserve(&[(p.entry_id, Decimal::from(90))], Some(Duration::seconds(1)))
            .unwrap();

        p.clock.advance(Duration::seconds(2));
        assert_eq!(p.reservations.sweep_expired(p.clock.now()).unwrap(), 1);

        assert!(matches!(
            p.reservations.confirm(token),
            Err(DomainError::ReservationNotFound(_))
        ));
        assert_eq!(on_hand(&p), Decimal::from(100));
    }

    #[test]
    fn holds_block_allocation_until_released() {
        let p = plant();
        let token = p
            .reservations
            .reserve(&[(p.entry_id, Decimal::from(98))], None)
            .unwrap();

        match p.orders.create_order(order_request(&p, 150, 1)) {
            Err(DomainError::InsufficientMaterials(lines)) => {
                assert_eq!(lines.len(), 1);
                assert_eq!(lines[0].available, Decimal::from(2));
                assert_eq!(lines[0].requested, Decimal::new(33, 1));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        p.reservations.release(token).unwrap();
        p.orders.create_order(order_request(&p, 150, 1)).unwrap();
        assert_eq!(on_hand(&p), Decimal::new(967, 1));
    }

    #[test]
    fn create_then_delete_restores_ledger() {
        let p = plant();
        let before = p.ledger.get(p.entry_id).unwrap();

        let order = p.orders.create_order(order_request(&p, 420, 3)).unwrap();
        assert!(on_hand(&p) < before.quantity_on_hand());
        p.orders.delete_order(order.id_typed()).unwrap();

        assert_eq!(on_hand(&p), before.quantity_on_hand());
        assert!(p.orders.list_orders(None).unwrap().is_empty());
    }

    #[test]
    fn stale_order_write_is_a_concurrency_error() {
        let p = plant();
        let order = p.orders.create_order(order_request(&p, 150, 1)).unwrap();

        p.orders
            .update_order(
                order.id_typed(),
                OrderPatch {
                    notes: Some("hem 5cm".to_string()),
                    ..OrderPatch::default()
                },
            )
            .unwrap();

        let mut stale = order.clone();
        stale.touch(p.clock.now());
        let err = p
            .store
            .commit_order(
                OrderWrite::Update {
                    order: stale,
                    expected: ExpectedVersion::Exact(order.version()),
                },
                &[],
                p.clock.now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert!(err.is_transient());

        let current = p.orders.get_order(order.id_typed()).unwrap();
        assert_eq!(current.version(), 2);
        assert_eq!(current.notes(), Some("hem 5cm"));
    }

    #[test]
    fn concurrent_updates_of_one_order_all_land() {
        let p = plant();
        let order = p.orders.create_order(order_request(&p, 100, 1)).unwrap();
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let orders = p.orders.clone();
                let barrier = barrier.clone();
                let order_id = order.id_typed();
                thread::spawn(move || {
                    barrier.wait();
                    orders.update_order(
                        order_id,
                        OrderPatch {
                            notes: Some(format!("revision {i}")),
                            ..OrderPatch::default()
                        },
                    )
                })
            })
            .collect();

        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        let current = p.orders.get_order(order.id_typed()).unwrap();
        assert_eq!(current.version(), 1 + succeeded as u64);
        assert!(succeeded >= 1);
        assert_eq!(on_hand(&p), Decimal::new(978, 1));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Create { width: i64, multiplier: u32 },
        Resize { pick: usize, width: i64 },
        Advance { pick: usize },
        Delete { pick: usize },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (20i64..=500, 1u32..=3).prop_map(|(width, multiplier)| Step::Create { width, multiplier }),
            (any::<usize>(), 20i64..=500).prop_map(|(pick, width)| Step::Resize { pick, width }),
            any::<usize>().prop_map(|pick| Step::Advance { pick }),
            any::<usize>().prop_map(|pick| Step::Delete { pick }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn stock_is_conserved_across_order_lifecycles(steps in prop::collection::vec(step(), 1..12)) {
            let p = plant();

            for step in steps {
                let orders = p.orders.list_orders(None).unwrap();
                let pick = |i: usize| (!orders.is_empty()).then(|| orders[i % orders.len()].id_typed());
                // refusals (insufficient stock, illegal status, non-pending delete) are fine
                let _ = match step {
                    Step::Create { width, multiplier } => {
                        p.orders.create_order(order_request(&p, width, multiplier)).map(|_| ())
                    }
                    Step::Resize { pick: i, width } => match pick(i) {
                        Some(id) => p
                            .orders
                            .update_order(id, OrderPatch { width_cm: Some(Decimal::from(width)), ..OrderPatch::default() })
                            .map(|_| ()),
                        None => Ok(()),
                    },
                    Step::Advance { pick: i } => match pick(i) {
                        Some(id) => p
                            .orders
                            .update_order(id, OrderPatch { status: Some(OrderStatus::InProcess), ..OrderPatch::default() })
                            .map(|_| ()),
                        None => Ok(()),
                    },
                    Step::Delete { pick: i } => match pick(i) {
                        Some(id) => p.orders.delete_order(id).map(|_| ()),
                        None => Ok(()),
                    },
                };

                prop_assert!(on_hand(&p) >= Decimal::ZERO);
                prop_assert_eq!(on_hand(&p) + allocated(&p), Decimal::from(100));
            }
        }
    }
}
