//! The public surface as a user sees it, through the facade re-exports.

use openpmd::{Access, Dataset, Datatype, Extent, Offset, Series};

#[test]
fn write_and_read_through_the_facade() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/facade.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        series.set_author("facade test")?;
        series.set_software("openpmd", Some(env!("CARGO_PKG_VERSION")))?;

        let iteration = series.write_iterations().get(5)?;
        let field = iteration.meshes().at("E")?.component("x")?;
        field.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[3])))?;
        field.store_chunk(vec![1.0, 2.0, 3.0], Offset::from_slice(&[0]), Extent::from_slice(&[3]))?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    assert_eq!(series.author().as_deref(), Some("facade test"));
    assert_eq!(series.openpmd_version(), "1.1.0");
    assert!(series.base_path().contains("%T"));

    let iteration = series.iteration(5)?;
    let field = iteration.meshes().at("E")?.component("x")?;
    let chunk = field.load_chunk::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[3]))?;
    series.flush()?;
    similar_asserts::assert_eq!(chunk.get()?, vec![1.0, 2.0, 3.0]);

    let chunks = field.available_chunks()?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk.extent, Extent::from_slice(&[3]));
    Ok(())
}

#[test]
fn chunk_distribution_is_reachable_from_the_facade() {
    use openpmd::chunk::{RoundRobin, Strategy as _, WrittenChunkInfo};

    let table = vec![
        WrittenChunkInfo::new(Offset::from_slice(&[0]), Extent::from_slice(&[4]), 0),
        WrittenChunkInfo::new(Offset::from_slice(&[4]), Extent::from_slice(&[4]), 0),
    ];
    let readers = [(0, "a".to_owned()), (1, "b".to_owned())].into_iter().collect();
    let assigned = RoundRobin
        .assign_table(table, &Default::default(), &readers)
        .unwrap();
    assert_eq!(assigned[0].source_id, 0);
    assert_eq!(assigned[1].source_id, 1);
}
