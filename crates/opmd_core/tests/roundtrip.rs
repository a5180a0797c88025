//! End-to-end write/read cycles against the on-disk JSON driver.

use opmd_core::{Access, Dataset, Datatype, Extent, Offset, Series, Value};

fn file_based_path(dir: &tempfile::TempDir) -> String {
    format!("{}/data%T.json", dir.path().display())
}

#[test]
fn file_based_write_then_random_access_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = file_based_path(&dir);
    let payload = vec![0.0, 1.0, 2.0, 3.0];

    {
        let series = Series::new(&path, Access::Create)?;
        let iterations = series.write_iterations();
        for index in [100, 200, 300] {
            let iteration = iterations.get(index)?;
            iteration.set_time(index as f64)?;
            let x = iteration
                .particles()
                .at("e")?
                .record("position")?
                .component("x")?;
            x.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[4])))?;
            x.store_chunk(payload.clone(), Offset::from_slice(&[0]), Extent::from_slice(&[4]))?;
            x.set_unit_si(1.0)?;
            iteration.close()?;
        }
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    assert_eq!(series.iteration_indices(), vec![100, 200, 300]);
    for index in [100, 200, 300] {
        let iteration = series.iteration(index)?;
        assert_eq!(iteration.time(), index as f64);
        assert!(iteration.closed_by_writer());

        let x = iteration
            .particles()
            .at("e")?
            .record("position")?
            .component("x")?;
        assert_eq!(x.dtype(), Some(Datatype::F64));
        assert_eq!(x.extent(), Some(Extent::from_slice(&[4])));

        let chunk = x.load_chunk::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[4]))?;
        series.flush()?;
        similar_asserts::assert_eq!(chunk.get()?, payload.clone());
    }
    Ok(())
}

#[test]
fn attribute_round_trip_with_edge_values() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/attrs.json", dir.path().display());

    let cases: Vec<(&str, Value)> = vec![
        ("empty_string", Value::from("")),
        ("empty_vector", Value::from(Vec::<f64>::new())),
        ("infinite", Value::from(f64::INFINITY)),
        ("unit_dimension", Value::from([0.0_f64; 7])),
        ("an_unsigned", Value::from(18_446_744_073_709_551_615_u64)),
        ("a_boolean", Value::from(false)),
        ("labels", Value::from(vec!["x".to_owned(), String::new()])),
    ];

    {
        let series = Series::new(&path, Access::Create)?;
        let iteration = series.write_iterations().get(0)?;
        for (name, value) in &cases {
            iteration.set_attribute(name, value.clone())?;
        }
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let iteration = series.iteration(0)?;
    for (name, value) in &cases {
        let read_back = iteration
            .get_attribute(name)
            .unwrap_or_else(|| panic!("attribute '{name}' did not survive"));
        assert_eq!(read_back, *value, "attribute '{name}'");
        assert_eq!(read_back.dtype(), value.dtype(), "datatype tag of '{name}'");
    }
    Ok(())
}

#[test]
fn dataset_round_trip_across_datatypes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/dtypes.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        let iteration = series.write_iterations().get(7)?;
        let mesh = iteration.meshes().at("sample")?;

        let ints = mesh.component("ints")?;
        ints.reset_dataset(Dataset::new(Datatype::I32, Extent::from_slice(&[3])))?;
        ints.store_chunk(vec![-1_i32, 0, 1], Offset::from_slice(&[0]), Extent::from_slice(&[3]))?;

        let flags = mesh.component("flags")?;
        flags.reset_dataset(Dataset::new(Datatype::Bool, Extent::from_slice(&[2])))?;
        flags.store_chunk(vec![true, false], Offset::from_slice(&[0]), Extent::from_slice(&[2]))?;

        let complex = mesh.component("complex")?;
        complex.reset_dataset(Dataset::new(Datatype::CF64, Extent::from_slice(&[1])))?;
        complex.store_chunk(
            vec![opmd_types::Complex64::new(1.0, -1.0)],
            Offset::from_slice(&[0]),
            Extent::from_slice(&[1]),
        )?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let mesh = series.iteration(7)?.meshes().at("sample")?;

    let ints = mesh.component("ints")?.load_chunk::<i32>(
        Offset::from_slice(&[0]),
        Extent::from_slice(&[3]),
    )?;
    let flags = mesh.component("flags")?.load_chunk::<bool>(
        Offset::from_slice(&[0]),
        Extent::from_slice(&[2]),
    )?;
    let complex = mesh.component("complex")?.load_chunk::<opmd_types::Complex64>(
        Offset::from_slice(&[0]),
        Extent::from_slice(&[1]),
    )?;
    series.flush()?;

    assert_eq!(ints.get()?, vec![-1, 0, 1]);
    assert_eq!(flags.get()?, vec![true, false]);
    assert_eq!(complex.get()?, vec![opmd_types::Complex64::new(1.0, -1.0)]);
    Ok(())
}

#[test]
fn disjoint_chunks_commute() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let chunk_a = (vec![1.0, 2.0], Offset::from_slice(&[0]), Extent::from_slice(&[2]));
    let chunk_b = (vec![3.0, 4.0], Offset::from_slice(&[2]), Extent::from_slice(&[2]));

    for (run, order) in [
        ("ab", [&chunk_a, &chunk_b]),
        ("ba", [&chunk_b, &chunk_a]),
    ] {
        let path = format!("{}/{run}.json", dir.path().display());
        {
            let series = Series::new(&path, Access::Create)?;
            let component = series
                .write_iterations()
                .get(0)?
                .meshes()
                .at("rho")?
                .scalar()?;
            component.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[4])))?;
            for (data, offset, extent) in order {
                component.store_chunk(data.clone(), offset.clone(), extent.clone())?;
            }
            series.close()?;
        }

        let series = Series::new(&path, Access::ReadOnly)?;
        let component = series.iteration(0)?.meshes().at("rho")?.scalar()?;
        let all = component.load_chunk::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[4]))?;
        series.flush()?;
        assert_eq!(all.get()?, vec![1.0, 2.0, 3.0, 4.0], "order {run}");
    }
    Ok(())
}

#[test]
fn constant_components_synthesise_reads() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/constant.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        let component = series
            .write_iterations()
            .get(0)?
            .meshes()
            .at("density")?
            .scalar()?;
        component.make_constant(42.0_f64, Extent::from_slice(&[2, 3, 4]))?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let component = series.iteration(0)?.meshes().at("density")?.scalar()?;
    assert!(component.is_constant());
    assert_eq!(component.extent(), Some(Extent::from_slice(&[2, 3, 4])));

    // any sub-chunk of any shape within the extent is uniformly 42
    let chunk = component.load_chunk::<f64>(Offset::from_slice(&[1, 1, 2]), Extent::from_slice(&[1, 2, 2]))?;
    assert_eq!(chunk.get()?, vec![42.0; 4]);

    let chunks = component.available_chunks()?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk.offset.as_slice(), &[0, 0, 0]);
    assert_eq!(chunks[0].chunk.extent.as_slice(), &[2, 3, 4]);
    Ok(())
}

#[test]
fn resizable_datasets_extend_but_never_shrink() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/grow.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        let component = series
            .write_iterations()
            .get(0)?
            .meshes()
            .at("t")?
            .scalar()?;
        component.reset_dataset(
            Dataset::new(Datatype::U64, Extent::from_slice(&[2])).resizable(true),
        )?;
        component.store_chunk(vec![1_u64, 2], Offset::from_slice(&[0]), Extent::from_slice(&[2]))?;
        series.flush()?;

        component.extend_dataset(Extent::from_slice(&[4]))?;
        component.store_chunk(vec![3_u64, 4], Offset::from_slice(&[2]), Extent::from_slice(&[2]))?;
        assert!(component.extend_dataset(Extent::from_slice(&[3])).is_err());
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let component = series.iteration(0)?.meshes().at("t")?.scalar()?;
    assert_eq!(component.extent(), Some(Extent::from_slice(&[4])));
    let all = component.load_chunk::<u64>(Offset::from_slice(&[0]), Extent::from_slice(&[4]))?;
    series.flush()?;
    assert_eq!(all.get()?, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn dirty_propagation_follows_mutation_and_flush() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/dirty.json", dir.path().display());

    let series = Series::new(&path, Access::Create)?;
    let iteration = series.write_iterations().get(0)?;
    series.flush()?;
    assert!(!series.dirty_recursive());

    let component = iteration.meshes().at("e")?.scalar()?;
    component.reset_dataset(Dataset::new(Datatype::F32, Extent::from_slice(&[1])))?;

    // a single leaf mutation dirties every ancestor
    assert!(component.dirty_recursive());
    assert!(iteration.dirty_recursive());
    assert!(series.dirty_recursive());

    series.flush()?;
    assert!(!component.dirty_recursive());
    assert!(!iteration.dirty_recursive());
    assert!(!series.dirty_recursive());
    Ok(())
}

#[test]
fn store_chunk_checks_bounds_and_types() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/bounds.json", dir.path().display());
    let series = Series::new(&path, Access::Create)?;
    let component = series.write_iterations().get(0)?.meshes().at("m")?.scalar()?;
    component.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[4])))?;

    // out of bounds
    assert!(component
        .store_chunk(vec![0.0; 2], Offset::from_slice(&[3]), Extent::from_slice(&[2]))
        .is_err());
    // wrong element type
    assert!(component
        .store_chunk(vec![0_i32; 2], Offset::from_slice(&[0]), Extent::from_slice(&[2]))
        .is_err());
    // buffer length must match the selection
    assert!(component
        .store_chunk(vec![0.0; 3], Offset::from_slice(&[0]), Extent::from_slice(&[2]))
        .is_err());
    // re-resetting with a different datatype after writing is refused
    component.store_chunk(vec![0.0; 4], Offset::from_slice(&[0]), Extent::from_slice(&[4]))?;
    series.flush()?;
    assert!(component
        .reset_dataset(Dataset::new(Datatype::I64, Extent::from_slice(&[4])))
        .is_err());
    Ok(())
}

#[test]
fn span_based_writing_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/span.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        let component = series.write_iterations().get(0)?.meshes().at("j")?.scalar()?;
        component.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[3])))?;
        let span = component
            .get_buffer_view::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[3]))?
            .expect("the json driver offers spans");
        span.update(|data| {
            data.copy_from_slice(&[9.0, 8.0, 7.0]);
        })?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let component = series.iteration(0)?.meshes().at("j")?.scalar()?;
    let chunk = component.load_chunk::<f64>(Offset::from_slice(&[0]), Extent::from_slice(&[3]))?;
    series.flush()?;
    assert_eq!(chunk.get()?, vec![9.0, 8.0, 7.0]);
    Ok(())
}
