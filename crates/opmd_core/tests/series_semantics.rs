//! Series-level semantics: append mode, pattern scanning, snapshot
//! traversal and the close lifecycle.

use opmd_core::{Access, Series};

#[test]
fn append_mode_extends_an_existing_group_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/appended.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        series.write_iterations().get(1)?.set_time(1.0)?;
        series.close()?;
    }
    {
        let series = Series::new(&path, Access::Append)?;
        series.write_iterations().get(2)?.set_time(2.0)?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    assert_eq!(series.iteration_indices(), vec![1, 2]);
    assert_eq!(series.iteration(1)?.time(), 1.0);
    assert_eq!(series.iteration(2)?.time(), 2.0);
    Ok(())
}

#[test]
fn directory_scan_rejects_conflicting_padding() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // two zero-padded spellings of different width cannot belong to the
    // same series
    std::fs::write(dir.path().join("data000100.json"), "{}")?;
    std::fs::write(dir.path().join("data0200.json"), "{}")?;

    let path = format!("{}/data%T.json", dir.path().display());
    let err = Series::new(&path, Access::ReadOnly).unwrap_err();
    assert!(err.to_string().contains("padding"), "{err}");
    Ok(())
}

#[test]
fn fixed_padding_pattern_names_files_accordingly() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/sim%06T.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        series.write_iterations().get(100)?;
        series.close()?;
    }
    assert!(dir.path().join("sim000100.json").is_file());

    let series = Series::new(&path, Access::ReadOnly)?;
    assert_eq!(series.iteration_indices(), vec![100]);
    Ok(())
}

#[test]
fn snapshots_iterate_without_consuming() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/snapshots.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        for index in [3, 1, 2] {
            series.write_iterations().get(index)?;
        }
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let first_pass: Vec<u64> = series
        .snapshots()?
        .map(|iteration| iteration.map(|it| it.index()))
        .collect::<Result<_, _>>()?;
    assert_eq!(first_pass, vec![1, 2, 3]);

    // random access does not close anything; a second pass sees the same
    let second_pass: Vec<u64> = series
        .snapshots()?
        .map(|iteration| iteration.map(|it| it.index()))
        .collect::<Result<_, _>>()?;
    assert_eq!(second_pass, first_pass);
    Ok(())
}

#[test]
fn closed_iterations_refuse_reopening() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/closing.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        series.write_iterations().get(0)?;
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    let iteration = series.iteration(0)?;
    iteration.close()?;
    assert!(iteration.closed());
    let err = iteration.open().unwrap_err();
    assert!(err.to_string().contains("cannot be reopened"), "{err}");
    Ok(())
}

#[test]
fn read_iterations_refuses_partially_consumed_series() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = format!("{}/partial.json", dir.path().display());

    {
        let series = Series::new(&path, Access::Create)?;
        for index in [10, 20] {
            series.write_iterations().get(index)?;
        }
        series.close()?;
    }

    let series = Series::new(&path, Access::ReadOnly)?;
    series.iteration(10)?.close()?;
    assert!(series.read_iterations().is_err());
    Ok(())
}

#[test]
fn unknown_suffixes_need_an_explicit_backend() {
    let err = Series::new("data.bp", Access::Create).unwrap_err();
    assert!(err.to_string().contains("backend"), "{err}");
}

#[test]
fn malformed_expansion_patterns_are_parse_errors() {
    for path in ["data%X.json", "data%0T.json"] {
        let err = Series::new(path, Access::Create).unwrap_err();
        assert!(matches!(err, opmd_core::Error::Parse(_)), "{path}: {err}");
    }
}
