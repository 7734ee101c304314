use std::fs;
use std::path::{Path, PathBuf};

use tabport::workbook::{Workbook, WorkbookTable};
use tabport::{
    open_sink, with_sink, CsvOptions, Destination, Diagnostic, MemoryWorkbookOpener, Row, SinkContext, SinkOptions,
    TabportConfig, TabportError, TabularSink, Value, WorkbookCache,
};
use tempfile::TempDir;

fn context() -> SinkContext {
    SinkContext::new(TabportConfig::default())
}

fn write_rows(destination: Destination, options: SinkOptions, rows: Vec<Row>) -> Vec<Diagnostic> {
    let mut context = context();
    let (_, report) = with_sink(destination, options, &mut context, |sink| {
        for row in rows {
            sink.append(row)?;
        }
        Ok(())
    })
    .unwrap();
    report.diagnostics
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_append_to_existing_headers() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");
    fs::write(&path, "previous;col2;col1\r\n;02;01").unwrap();

    let diagnostics = write_rows(
        Destination::File(path.clone()),
        SinkOptions::new()
            .with_headers(["col1", "col2", "col3", "col4"])
            .appending()
            .quiet(),
        vec![Row::positional([11, 12, 13, 14])],
    );

    assert_eq!(read(&path), "previous;col2;col1\r\n;02;01\r\n;12;11;13;14");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(
        diagnostics[0].to_string(),
        "Header \"col3\", \"col4\" not found in existing headers: values will be appended without a column header"
    );
}

#[test]
fn test_append_to_missing_file_writes_header() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("out.csv");

    let diagnostics = write_rows(
        Destination::File(path.clone()),
        SinkOptions::new().with_headers(["a", "b"]).appending().quiet(),
        vec![Row::positional([1, 2])],
    );

    assert_eq!(read(&path), "a,b\r\n1,2");
    assert!(diagnostics.is_empty());
}

#[test]
fn test_no_headers() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");

    write_rows(
        Destination::File(path.clone()),
        SinkOptions::new().quiet(),
        vec![Row::positional(vec![
            Value::from("Text"),
            Value::from("\"Quote\""),
            Value::from("New\r\nLine"),
            Value::from(1),
            Value::from(3.14),
            Value::from(""),
            Value::Null,
        ])],
    );

    assert_eq!(read(&path), "Text,\"\"\"Quote\"\"\",\"New\r\nLine\",1,3.14,\"\",");
}

#[test]
fn test_delayed_headers_are_union_of_keys() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");

    let diagnostics = write_rows(
        Destination::File(path.clone()),
        SinkOptions::new().quiet(),
        vec![
            Row::keyed([("a", 1), ("b", 2)]),
            Row::keyed([("b", 3), ("c", 4)]),
            Row::keyed([("a", 5)]),
        ],
    );

    assert_eq!(read(&path), "a,b,c\r\n1,2,\r\n,3,4\r\n5,,");
    assert!(diagnostics.is_empty());
}

#[test]
fn test_unknown_keys_are_appended_without_header() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");

    let diagnostics = write_rows(
        Destination::File(path.clone()),
        SinkOptions::new().with_headers(["a", "b"]).quiet(),
        vec![
            Row::keyed([("a", 1), ("b", 2)]),
            Row::keyed([("b", 3), ("c", 4)]),
            Row::keyed([("a", 5)]),
        ],
    );

    assert_eq!(read(&path), "a,b\r\n1,2\r\n,3,4\r\n5,,");
    assert_eq!(
        diagnostics,
        vec![Diagnostic::UnmatchedKeys {
            row: 2,
            keys: vec!["c".to_string()],
            column: 3,
            named: false,
        }]
    );
    assert_eq!(
        diagnostics[0].to_string(),
        "Row 2 key \"c\" not found in headers: value will be appended at column 3 with an empty header"
    );
}

#[test]
fn test_positional_length_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");

    let diagnostics = write_rows(
        Destination::File(path.clone()),
        SinkOptions::new().with_headers(["a", "b"]).quiet(),
        vec![Row::positional([1]), Row::positional([1, 2, 3])],
    );

    assert_eq!(read(&path), "a,b\r\n1,\r\n1,2,3");
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[0].to_string(), "Row 1 length: 1 (expected headers length: 2)");
    assert_eq!(diagnostics[1].to_string(), "Row 2 length: 3 (expected headers length: 2)");
}

#[test]
fn test_strict_headers_fail() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");
    let mut context = context();

    let result = with_sink(
        Destination::File(path),
        SinkOptions::new().with_headers(["a", "b"]).strict().quiet(),
        &mut context,
        |sink| sink.append(Row::positional([1])),
    );
    assert!(matches!(result, Err(TabportError::HeaderMismatch(_))));
}

#[test]
fn test_placeholders_then_append_reordered() {
    let temp_dir = TempDir::new().unwrap();
    let pattern = temp_dir.path().join("{prefix}_{title}.csv");
    let expected_path = temp_dir.path().join("P_T.csv");

    write_rows(
        Destination::File(pattern.clone()),
        SinkOptions::new()
            .with_headers(["X", "Y"])
            .with_csv(CsvOptions::default().with_delimiter(';'))
            .with_title("T")
            .with_prefix("P"),
        vec![],
    );
    assert_eq!(read(&expected_path), "X;Y");

    let diagnostics = write_rows(
        Destination::File(pattern),
        SinkOptions::new()
            .with_headers(["Y", "X", "Z"])
            .appending()
            .with_title("T")
            .with_prefix("P")
            .quiet(),
        vec![
            Row::positional([3, 4, 0]),
            Row::positional(["a", "b", "Z"]),
        ],
    );

    assert_eq!(read(&expected_path), "X;Y\r\n4;3;0\r\nb;a;Z");
    assert_eq!(
        diagnostics,
        vec![Diagnostic::UnmatchedHeaders {
            headers: vec!["Z".to_string()],
            named: false,
        }]
    );
}

#[test]
fn test_sink_closed_when_closure_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");
    let mut context = context();

    let result: tabport::Result<((), _)> = with_sink(
        Destination::File(path.clone()),
        SinkOptions::new().with_headers(["a"]).quiet(),
        &mut context,
        |sink| {
            sink.append(Row::positional([1]))?;
            Err(TabportError::Load("interrupted".to_string()))
        },
    );

    assert!(matches!(result, Err(TabportError::Load(_))));
    assert_eq!(read(&path), "a\r\n1");
}

#[test]
fn test_drop_finalizes_delayed_rows() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");
    let mut context = context();

    {
        let mut sink = open_sink(Destination::File(path.clone()), SinkOptions::new().quiet(), &mut context).unwrap();
        sink.append(Row::keyed([("k", "v")])).unwrap();
        assert_eq!(sink.row_count(), 1);
    }

    assert_eq!(read(&path), "k\r\nv");
}

#[test]
fn test_excel_flavor() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");
    let mut context = SinkContext::new(TabportConfig {
        csv_decimal_separator: ',',
        ..TabportConfig::default()
    });
    let ts = chrono::NaiveDate::from_ymd_opt(2021, 3, 4)
        .unwrap()
        .and_hms_milli_opt(5, 6, 7, 890)
        .unwrap();

    with_sink(
        Destination::File(path.clone()),
        SinkOptions::new()
            .with_headers(["when", "amount"])
            .with_format("csv-excel".parse().unwrap()),
        &mut context,
        |sink| sink.append(Row::positional(vec![Value::from(ts), Value::from(1.5)])),
    )
    .unwrap();

    assert_eq!(read(&path), "\u{feff}when;amount\r\n2021-03-04 05:06:07;1,5");
}

#[test]
fn test_disabled_output_counts_rows() {
    let mut context = context();
    let (_, report) = with_sink(Destination::Disabled, SinkOptions::new(), &mut context, |sink| {
        for i in 0..3 {
            sink.append(Row::positional([i]))?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(report.row_count, 3);
    assert!(report.diagnostics.is_empty());
}

const FRUITS: [&str; 8] = ["Apple", "Banana", "Cherry", "Date", "Elderberry", "Fig", "Grape", "Honeydew"];

fn fruit_columns() -> Vec<String> {
    FRUITS.iter().map(|f| f.to_string()).collect()
}

#[test]
fn test_workbook_successive_writes() {
    let opener = MemoryWorkbookOpener::new();
    let path = PathBuf::from("fruits.xlsx");

    // Existing table with one extra column and a stale row
    {
        let mut cache = WorkbookCache::new(Box::new(opener.clone()));
        let mut columns = fruit_columns();
        columns.push("New".to_string());
        let workbook = cache.get_or_open(&path).unwrap();
        let table = workbook.table_mut("Out", &columns).unwrap();
        table.append_row(vec![Value::Int(0); 9]).unwrap();
        cache.close_all().unwrap();
    }

    let mut context = context().with_workbooks(WorkbookCache::new(Box::new(opener.clone())));
    let mut headers = fruit_columns();
    headers.push("2015".to_string());
    let mut values: Vec<Value> = (1..=8).map(Value::from).collect();
    values.push(Value::from("2015"));
    values.push(Value::from("MORE"));

    let (_, report) = with_sink(
        Destination::parse("fruits.xlsx").unwrap(),
        SinkOptions::new().with_headers(headers).quiet(),
        &mut context,
        |sink| sink.append(Row::positional(values)),
    )
    .unwrap();

    let table = opener.saved_table(&path, "Out").unwrap();
    let mut expected_columns = fruit_columns();
    expected_columns.push("New".to_string());
    expected_columns.push("2015".to_string());
    assert_eq!(table.columns, expected_columns);

    let mut expected_row: Vec<Value> = (1..=8).map(Value::from).collect();
    expected_row.push(Value::Null);
    expected_row.push(Value::from("2015"));
    assert_eq!(table.rows, vec![expected_row]);

    assert_eq!(
        report.diagnostics,
        vec![
            Diagnostic::UnmatchedHeaders {
                headers: vec!["2015".to_string()],
                named: true,
            },
            Diagnostic::RowLength {
                row: 1,
                length: 10,
                expected: 9,
                ignored: vec!["MORE".to_string()],
            },
        ]
    );
}

#[test]
fn test_workbook_unknown_keys_become_columns_with_warning() {
    let opener = MemoryWorkbookOpener::new();
    let path = PathBuf::from("keys.xlsx");
    let mut context = context().with_workbooks(WorkbookCache::new(Box::new(opener.clone())));

    let (_, report) = with_sink(
        Destination::parse("keys.xlsx").unwrap(),
        SinkOptions::new().with_headers(["a"]).quiet(),
        &mut context,
        |sink| {
            sink.append(Row::keyed([("a", 1), ("b", 2)]))?;
            sink.append(Row::keyed([("b", 3)]))
        },
    )
    .unwrap();

    let table = opener.saved_table(&path, "Out").unwrap();
    assert_eq!(table.columns, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        table.rows,
        vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Null, Value::Int(3)]]
    );
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(
        report.diagnostics[0].to_string(),
        "Row 1 key \"b\" not found in headers: added as column 2"
    );
}

#[test]
fn test_workbook_several_tables() {
    let opener = MemoryWorkbookOpener::new();
    let path = PathBuf::from("book.xlsx");
    let mut context = context().with_workbooks(WorkbookCache::new(Box::new(opener.clone())));

    for (table, key) in [("First", "a"), ("Second", "b")] {
        with_sink(
            Destination::parse(&format!("book.xlsx#{}", table)).unwrap(),
            SinkOptions::new().quiet(),
            &mut context,
            |sink| {
                sink.append(Row::keyed([(key, 1)]))?;
                sink.append(Row::keyed([(key, 2), ("extra", 3)]))
            },
        )
        .unwrap();
    }

    let first = opener.saved_table(&path, "First").unwrap();
    assert_eq!(first.columns, vec!["a".to_string(), "extra".to_string()]);
    assert_eq!(
        first.rows,
        vec![vec![Value::Int(1), Value::Null], vec![Value::Int(2), Value::Int(3)]]
    );

    let second = opener.saved_table(&path, "Second").unwrap();
    assert_eq!(second.columns, vec!["b".to_string(), "extra".to_string()]);
    assert!(context.workbooks.as_ref().unwrap().is_open(&path));
}

#[test]
fn test_workbook_without_backend_fails() {
    let mut context = context();
    let result = open_sink(Destination::parse("book.xlsx").unwrap(), SinkOptions::new(), &mut context);
    assert!(matches!(result, Err(TabportError::Workbook(_))));
}
