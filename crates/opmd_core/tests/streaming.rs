//! Step and stream semantics: group-based reading, the in-memory stream
//! driver, and the attribute overwrite policy.

use opmd_core::{Access, Dataset, Datatype, Extent, Offset, Series};

#[test]
fn group_based_write_then_linear_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/series.json", dir.path().display());
    let payload = vec![0.5, 1.5];

    {
        let series = Series::new(&path, Access::Create)?;
        let iterations = series.write_iterations();
        for index in [100, 200, 300] {
            let iteration = iterations.get(index)?;
            let x = iteration
                .particles()
                .at("e")?
                .record("position")?
                .component("x")?;
            x.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[2])))?;
            x.store_chunk(payload.clone(), Offset::from_slice(&[0]), Extent::from_slice(&[2]))?;
            iteration.close()?;
        }
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadLinear)?;
    let mut observed = Vec::new();
    for iteration in series.read_iterations()? {
        let iteration = iteration?;
        observed.push(iteration.index());

        let x = iteration
            .particles()
            .at("e")?
            .record("position")?
            .component("x")?;
        let chunk = x.load_chunk::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[2]))?;
        series.flush()?;
        assert_eq!(chunk.get()?, payload);

        // closing is idempotent
        iteration.close()?;
        iteration.close()?;
        assert!(iteration.closed());
    }
    assert_eq!(observed, vec![100, 200, 300]);
    Ok(())
}

#[test]
fn memory_stream_delivers_steps_in_order_and_ends() -> anyhow::Result<()> {
    let dir = "virtual/stream-in-order";
    opmd_backend_json::MemoryStreamBackend::evict(dir, "series.mem");
    let path = format!("{dir}/series.mem");

    {
        let series = Series::new(&path, Access::Create)?;
        let iterations = series.write_iterations();
        for index in [100, 200, 300] {
            let iteration = iterations.get(index)?;
            iteration.set_time(index as f64)?;
            let rho = iteration.meshes().at("rho")?.scalar()?;
            rho.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[1])))?;
            rho.store_chunk(vec![index as f64], Offset::from_slice(&[0]), Extent::from_slice(&[1]))?;
            iteration.close()?;
        }
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadLinear)?;
    let mut observed = Vec::new();
    for iteration in series.read_iterations()? {
        let iteration = iteration?;
        observed.push(iteration.index());
        assert_eq!(iteration.time(), iteration.index() as f64);

        let rho = iteration.meshes().at("rho")?.scalar()?;
        let chunk = rho.load_chunk::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[1]))?;
        series.flush()?;
        assert_eq!(chunk.get()?, vec![iteration.index() as f64]);
        iteration.close()?;
    }
    assert_eq!(observed, vec![100, 200, 300]);
    Ok(())
}

#[test]
fn overwriting_committed_attributes_depends_on_the_driver() -> anyhow::Result<()> {
    // the json document driver can overwrite committed attributes
    let dir = tempfile::tempdir()?;
    let path = format!("{}/mutable.json", dir.path().display());
    let series = Series::new(&path, Access::Create)?;
    let iteration = series.write_iterations().get(0)?;
    iteration.set_attribute("x", 1_u32)?;
    series.flush()?;
    iteration.set_attribute("x", 2_u32)?;
    series.flush()?;
    drop(series);

    // the streaming driver pins whatever a step committed
    let stream_dir = "virtual/stream-overwrite";
    opmd_backend_json::MemoryStreamBackend::evict(stream_dir, "series.mem");
    let series = Series::new(&format!("{stream_dir}/series.mem"), Access::Create)?;
    let iteration = series.write_iterations().get(0)?;
    iteration.set_attribute("x", 1_u32)?;
    series.flush()?;
    let err = iteration.set_attribute("x", 2_u32).unwrap_err();
    assert!(err.to_string().contains("previous step"), "{err}");
    // re-staging the identical value stays a no-op
    iteration.set_attribute("x", 1_u32)?;
    Ok(())
}

#[test]
fn deferred_parsing_postpones_the_hierarchy() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/deferred%T.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        for index in [1, 2] {
            let iteration = series.write_iterations().get(index)?;
            iteration.set_time(index as f64)?;
            iteration.close()?;
        }
        series.close()?;
    }

    let series = Series::with_options(
        &path,
        Access::ReadOnly,
        r#"{"defer_iteration_parsing": true}"#,
    )?;
    // nothing parsed yet: the frontend has not seen any time attribute
    assert_eq!(series.iteration_indices(), vec![1, 2]);

    // first access drives Deferred -> Parsed
    let iteration = series.iteration(1)?;
    assert_eq!(iteration.parse_state(), opmd_core::ParseState::Parsed);
    assert_eq!(iteration.time(), 1.0);

    // an explicit refresh re-reads without access-mode tricks
    iteration.refresh()?;
    assert_eq!(iteration.time(), 1.0);
    Ok(())
}

#[test]
fn variable_based_series_follow_the_snapshot_attribute() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/varbased.json", dir.path().display());

    {
        let series = Series::with_options(
            &path,
            Access::Create,
            r#"{"iteration_encoding": "variable_based"}"#,
        )?;
        let iteration = series.write_iterations().get(42)?;
        iteration.set_time(4.2)?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    assert_eq!(
        series.iteration_encoding(),
        opmd_core::IterationEncoding::VariableBased
    );
    assert_eq!(series.iteration_indices(), vec![42]);
    assert_eq!(series.iteration(42)?.time(), 4.2);
    Ok(())
}
