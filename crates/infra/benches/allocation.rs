use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use rust_decimal::Decimal;

use curtainworks_catalog::{Design, DesignMaterialLine, MaterialColor, MaterialReference, MaterialType};
use curtainworks_core::{ColorId, DesignId, LedgerEntryId, MaterialTypeId, ReferenceId, SystemClock};
use curtainworks_events::{InMemoryEventBus, NotificationEnvelope};
use curtainworks_infra::{
    InMemoryCatalog, InMemoryInventoryStore, NewCurtainOrder, OrderAllocationCoordinator,
    ReservationManager, RetryPolicy, StockLedger,
};
use curtainworks_inventory::NewLedgerEntry;

type Store = Arc<InMemoryInventoryStore>;
type Bus = Arc<InMemoryEventBus<NotificationEnvelope>>;

/// Large enough that no benchmark iteration runs out of stock.
const STOCK: i64 = 1_000_000_000;

struct Bench {
    reservations: ReservationManager<Store, Bus>,
    orders: OrderAllocationCoordinator<Store, Arc<InMemoryCatalog>, Bus>,
    entries: Vec<LedgerEntryId>,
    design_id: DesignId,
}

/// `lines` fabrics, each stocked and bound to one line of a single design.
fn setup(lines: usize) -> Bench {
    let store: Store = Arc::new(InMemoryInventoryStore::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let clock = Arc::new(SystemClock);
    let ledger = StockLedger::new(store.clone(), bus.clone(), clock.clone());

    let mut design = Design::new(DesignId::new(), "BENCH", "Benchmark design", Decimal::from(30))
        .expect("valid design");
    let mut entries = Vec::with_capacity(lines);
    for i in 0..lines {
        let material_type = MaterialType::new(MaterialTypeId::new(), format!("Type {i}")).unwrap();
        let reference = MaterialReference::new(
            ReferenceId::new(),
            material_type.id,
            format!("REF-{i}"),
            format!("Reference {i}"),
            Decimal::new(995, 2),
        )
        .unwrap();
        let color = MaterialColor::new(ColorId::new(), reference.id, "STD", "Standard").unwrap();
        design
            .add_line(DesignMaterialLine::new(material_type.id, Decimal::ONE).bound_to(reference.id, color.id))
            .unwrap();

        catalog.add_material_type(material_type).unwrap();
        catalog.add_reference(reference.clone()).unwrap();
        catalog.add_color(color.clone()).unwrap();
        let entry = ledger
            .create(NewLedgerEntry {
                reference_id: reference.id,
                color_id: color.id,
                initial_quantity: Decimal::from(STOCK),
                minimum_threshold: Decimal::ZERO,
                location: None,
            })
            .unwrap();
        entries.push(entry.id_typed());
    }
    let design_id = design.id_typed();
    catalog.add_design(design).unwrap();

    Bench {
        reservations: ReservationManager::new(store.clone(), bus.clone(), clock.clone())
            .with_retry(RetryPolicy::no_retry()),
        orders: OrderAllocationCoordinator::new(store, catalog, bus, clock)
            .with_retry(RetryPolicy::no_retry()),
        entries,
        design_id,
    }
}

fn bench_reserve_confirm(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_confirm");

    for lines in [1usize, 4, 16] {
        let bench = setup(lines);
        let items: Vec<_> = bench.entries.iter().map(|id| (*id, Decimal::ONE)).collect();

        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &items, |b, items| {
            b.iter(|| {
                let token = bench.reservations.reserve(black_box(items), None).unwrap();
                bench.reservations.confirm(token).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_create_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_order");

    for lines in [1usize, 4, 16] {
        let bench = setup(lines);
        let request = NewCurtainOrder {
            design_id: bench.design_id,
            width_cm: Decimal::from(180),
            height_cm: Decimal::from(240),
            multiplier: 2,
            split: false,
            notes: None,
            selections: Vec::new(),
        };

        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &request, |b, request| {
            b.iter(|| bench.orders.create_order(black_box(request.clone())).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reserve_confirm, bench_create_order);
criterion_main!(benches);
