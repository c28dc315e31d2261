use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

pub mod read {
    use std::io::{Cursor, Write};

    use blam_map::layout::{FieldLayout, Primitive, RecordLayout};
    use blam_map::path::{resolve_offset, PropertyPath};
    use blam_map::types::{TagId, TypeCode};
    use blam_map::write::{MapWriter, MapWriterOptions};
    use blam_map::{MapArchive, Schema};
    use divan::Bencher;

    const ITEM: TypeCode = TypeCode::new(*b"item");
    const TAGS: u32 = 256;
    const ELEMENTS: i32 = 64;

    fn schema() -> Schema {
        Schema::builder()
            .layout(RecordLayout::fixed(
                "Element",
                8,
                vec![
                    FieldLayout::primitive("Weight", 0, Primitive::F32),
                    FieldLayout::primitive("Flags", 4, Primitive::U32),
                ],
            ))
            .layout(RecordLayout::arbitrary(
                "Item",
                vec![
                    FieldLayout::primitive("Id", 0, Primitive::I32),
                    FieldLayout::string("Name", 4, 16),
                    FieldLayout::reference_array("Elements", 20, "Element"),
                ],
            ))
            .bind(ITEM, "Item")
            .build()
    }

    fn get_input() -> Vec<u8> {
        let mut map = MapWriter::new(Cursor::new(Vec::new()), MapWriterOptions::default());
        for i in 0..TAGS {
            let address = map
                .start_tag(TagId(0xE000_0000 + i), ITEM, format!("items/item_{i}"))
                .unwrap();

            let mut body = Vec::new();
            body.extend_from_slice(&(i as i32).to_le_bytes());
            body.extend_from_slice(format!("{:<15}\0", format!("item {i}")).as_bytes());
            body.extend_from_slice(&ELEMENTS.to_le_bytes());
            body.extend_from_slice(&(address + 28).to_le_bytes());
            for e in 0..ELEMENTS {
                body.extend_from_slice(&(e as f32 * 0.5).to_le_bytes());
                body.extend_from_slice(&(e as u32).to_le_bytes());
            }
            map.write_all(&body).unwrap();
        }
        map.finish().unwrap().into_inner()
    }

    #[divan::bench]
    fn open(bencher: Bencher) {
        bencher.with_inputs(get_input).bench_values(|data| {
            divan::black_box(MapArchive::new(data).unwrap());
        });
    }

    #[divan::bench]
    fn decode_tag(bencher: Bencher) {
        let schema = schema();
        let plan = schema.plan_for(ITEM).unwrap();
        let map = MapArchive::new(get_input()).unwrap();
        let entry = *map.entry(TagId(0xE000_0000)).unwrap();

        bencher.bench_local(|| {
            divan::black_box(map.decode(&plan, &entry).unwrap());
        });
    }

    #[divan::bench(sample_count = 1)]
    fn decode_all(bencher: Bencher) {
        let schema = schema();
        let plan = schema.plan_for(ITEM).unwrap();
        let map = MapArchive::new(get_input()).unwrap();

        bencher.bench_local(|| {
            for entry in map.entries() {
                divan::black_box(map.decode(&plan, entry).unwrap());
            }
        });
    }

    #[divan::bench]
    fn resolve_path(bencher: Bencher) {
        let schema = schema();
        let plan = schema.plan_for(ITEM).unwrap();
        let map = MapArchive::new(get_input()).unwrap();
        let entry = *map.entry(TagId(0xE000_0000 + TAGS - 1)).unwrap();
        let frame = map.frame(&entry).unwrap();
        let path: PropertyPath = "Elements[63].Flags".parse().unwrap();

        bencher.bench_local(|| {
            divan::black_box(resolve_offset(&plan, &path, map.data(), &frame).unwrap());
        });
    }
}
