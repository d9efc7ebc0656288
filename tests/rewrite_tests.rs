mod common;

use std::collections::BTreeSet;

use pdf_store::{
    rewrite, sweep, Dictionary, Document, EncryptionAlgorithm, ExpandFlags, Object, PDFResult,
    RewriteOptions, RewriteReport,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

use common::{append_update, encrypted_pdf, sample_builder, sample_pdf, CONTENT};

fn rewrite_bytes(data: Vec<u8>, options: &RewriteOptions) -> PDFResult<(Vec<u8>, RewriteReport)> {
    let mut doc = Document::from_bytes(data)?;
    let mut output = Vec::new();
    let report = rewrite(&mut doc, options, &mut output)?;
    Ok((output, report))
}

/// Stream dictionary without `/Length`, which a rewrite always makes direct
fn without_length(dict: &Dictionary) -> Dictionary {
    let mut dict = dict.clone();
    dict.remove("Length");
    dict
}

fn output_trailer_keys(doc: &Document) -> Vec<String> {
    doc.trailer()
        .keys()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .collect()
}

#[test_log::test]
fn test_level_zero_round_trip() -> PDFResult<()> {
    let (output, report) = rewrite_bytes(sample_pdf(), &RewriteOptions::new())?;
    assert_eq!(report.objects_written, 11);
    assert_eq!(report.objects_dropped, 0);
    assert!(!report.renumbered);
    assert_eq!(report.bytes_written, output.len() as u64);

    let mut original = Document::from_bytes(sample_pdf())?;
    let mut copy = Document::from_bytes(output)?;
    assert_eq!(copy.object_numbers(), original.object_numbers());

    for number in original.object_numbers() {
        let before = original.load_object(number)?;
        let after = copy.load_object(number)?;
        match (&*before, &*after) {
            (Object::Stream(a), Object::Stream(b)) => {
                assert_eq!(without_length(&a.dict), without_length(&b.dict));
                assert_eq!(original.raw_bytes(number)?, copy.raw_bytes(number)?);
            }
            (a, b) => assert_eq!(a, b, "object {}", number),
        }
    }
    Ok(())
}

#[test_log::test]
fn test_output_trailer_and_xref() -> PDFResult<()> {
    let (output, _) = rewrite_bytes(sample_pdf(), &RewriteOptions::new().garbage_level(1))?;
    let text = String::from_utf8_lossy(&output);
    assert!(text.starts_with("%PDF-1.4\n%"));
    assert!(text.ends_with("%%EOF\n"));
    assert!(text.contains("xref\n0 10\n0000000005 65535 f \n"));

    let doc = Document::from_bytes(output)?;
    assert_eq!(output_trailer_keys(&doc), vec!["Root", "Info", "ID", "Size"]);
    assert_eq!(doc.trailer().get_integer("Size"), Some(10));
    Ok(())
}

#[test_log::test]
fn test_sweep_drops_unreachable_objects() -> PDFResult<()> {
    let (output, report) = rewrite_bytes(sample_pdf(), &RewriteOptions::new().garbage_level(1))?;
    // 5 was an indirect length, 10 and 11 are unreachable
    assert_eq!(report.objects_written, 8);
    assert_eq!(report.objects_dropped, 3);

    let doc = Document::from_bytes(output)?;
    assert_eq!(doc.object_numbers(), vec![1, 2, 3, 4, 6, 7, 8, 9]);
    Ok(())
}

#[test_log::test]
fn test_sweep_is_idempotent() -> PDFResult<()> {
    let (once, first) = rewrite_bytes(sample_pdf(), &RewriteOptions::new().garbage_level(1))?;
    let mut doc = Document::from_bytes(once.clone())?;
    let trailer = doc.trailer().clone();
    let reached = sweep(&mut doc, &trailer);
    assert_eq!(reached.len(), first.objects_written);

    let (twice, second) = rewrite_bytes(once.clone(), &RewriteOptions::new().garbage_level(1))?;
    assert_eq!(second.objects_dropped, 0);
    assert_eq!(twice, once);
    Ok(())
}

#[test_log::test]
fn test_compact_renumbers_densely() -> PDFResult<()> {
    let (output, report) = rewrite_bytes(sample_pdf(), &RewriteOptions::new().garbage_level(2))?;
    assert!(report.renumbered);
    let mut doc = Document::from_bytes(output)?;
    assert_eq!(doc.object_numbers(), (1..=8).collect::<Vec<_>>());

    // Contents must still reach the content stream
    let page = doc.page_ids()?[0];
    let contents = doc.resolve(page)?.as_dict()?.get_reference("Contents");
    let contents = contents.map(|id| id.number).unwrap_or_default();
    assert_eq!(doc.decoded_bytes(contents)?, CONTENT);
    Ok(())
}

#[test_log::test]
fn test_compact_of_compacted_file_is_noop() -> PDFResult<()> {
    let options = RewriteOptions::new().garbage_level(2);
    let (once, _) = rewrite_bytes(sample_pdf(), &options)?;
    let (twice, report) = rewrite_bytes(once.clone(), &options)?;
    assert!(!report.renumbered);
    assert_eq!(twice, once);
    Ok(())
}

#[test_log::test]
fn test_dedup_leaves_no_identical_objects() -> PDFResult<()> {
    let (output, report) = rewrite_bytes(sample_pdf(), &RewriteOptions::new().garbage_level(3))?;
    assert_eq!(report.objects_merged, 1);
    assert_eq!(report.objects_written, 7);

    let mut doc = Document::from_bytes(output)?;
    let numbers = doc.object_numbers();
    let mut values = Vec::new();
    for &number in &numbers {
        let object = doc.load_object(number)?;
        if !matches!(*object, Object::Stream(_)) {
            values.push((number, object));
        }
    }
    for (i, (a_number, a)) in values.iter().enumerate() {
        for (b_number, b) in &values[i + 1..] {
            assert_ne!(a, b, "objects {} and {} are identical", a_number, b_number);
        }
    }

    let page = doc.page_ids()?[0];
    let page = doc.resolve(page)?;
    let states = page
        .as_dict()?
        .get("Resources")
        .and_then(|r| r.as_dict().ok())
        .and_then(|r| r.get("ExtGState"))
        .and_then(|g| g.as_dict().ok())
        .cloned()
        .unwrap_or_default();
    assert_eq!(states.get("GS1"), states.get("GS2"));
    Ok(())
}

#[test_log::test]
fn test_stream_dedup_is_opt_in() -> PDFResult<()> {
    let pdf = sample_builder()
        .stream(10, Dictionary::new(), b"same bytes")
        .stream(11, Dictionary::new(), b"same bytes")
        .object(
            12,
            Object::Array(vec![Object::reference(10, 0), Object::reference(11, 0)]),
        )
        .object(1, Object::Dictionary(pdf_store::dictionary! {
            "Type" => Object::name("Catalog"),
            "Pages" => Object::reference(2, 0),
            "Extra" => Object::reference(12, 0),
        }))
        .build();

    let (_, plain) = rewrite_bytes(pdf.clone(), &RewriteOptions::new().garbage_level(3))?;
    let (_, with_streams) = rewrite_bytes(pdf, &RewriteOptions::new().garbage_level(3).dedup_streams(true))?;
    assert_eq!(with_streams.objects_merged, plain.objects_merged + 1);
    Ok(())
}

#[test_log::test]
fn test_stream_length_matches_bytes_after_expand() -> PDFResult<()> {
    let binary: Vec<u8> = (0u8..=255).collect();
    let pdf = sample_builder()
        .stream(10, pdf_store::dictionary! { "Filter" => Object::name("FlateDecode") }, &pdf_store::encode_flate(&binary)?)
        .object(1, Object::Dictionary(pdf_store::dictionary! {
            "Type" => Object::name("Catalog"),
            "Pages" => Object::reference(2, 0),
            "Blob" => Object::reference(10, 0),
        }))
        .build();

    for options in [
        RewriteOptions::new().garbage_level(1).expand(ExpandFlags::STREAMS),
        RewriteOptions::new().garbage_level(1).ascii_safe(true),
        RewriteOptions::new().garbage_level(1).expand(ExpandFlags::ALL).ascii_safe(true),
    ] {
        let (output, report) = rewrite_bytes(pdf.clone(), &options)?;
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        let mut doc = Document::from_bytes(output)?;
        for number in doc.object_numbers() {
            let object = doc.load_object(number)?;
            let Object::Stream(stream) = &*object else { continue };
            let declared = stream.dict.get_integer("Length").unwrap_or(-1);
            assert_eq!(doc.raw_bytes(number)?.len() as i64, declared, "object {}", number);
        }
        assert_eq!(doc.decoded_bytes(4)?, CONTENT);
        assert_eq!(doc.decoded_bytes(10)?, binary);
    }
    Ok(())
}

#[test_log::test]
fn test_expand_removes_filters() -> PDFResult<()> {
    let options = RewriteOptions::new().garbage_level(1).expand(ExpandFlags::STREAMS);
    let (output, _) = rewrite_bytes(sample_pdf(), &options)?;
    let mut doc = Document::from_bytes(output)?;
    let content = doc.load_object(4)?;
    let content = content.as_stream()?;
    assert!(!content.dict.has("Filter"));
    assert_eq!(doc.raw_bytes(4)?, CONTENT);
    Ok(())
}

#[test_log::test]
fn test_ascii_shield_prepends_hex_filter() -> PDFResult<()> {
    let options = RewriteOptions::new().garbage_level(1).ascii_safe(true);
    let (output, _) = rewrite_bytes(sample_pdf(), &options)?;
    assert!(output[15..].iter().all(|b| b.is_ascii()));

    let mut doc = Document::from_bytes(output)?;
    let content = doc.load_object(4)?;
    assert_eq!(
        content.as_stream()?.dict.get("Filter"),
        Some(&Object::Array(vec![Object::name("ASCIIHexDecode"), Object::name("FlateDecode")]))
    );
    assert_eq!(doc.decoded_bytes(4)?, CONTENT);
    Ok(())
}

#[test_log::test]
fn test_object_streams_are_unpacked() -> PDFResult<()> {
    let pdf = sample_builder().version("1.5").object_stream(12, &[6, 7, 8, 9]).build();
    let mut source = Document::from_bytes(pdf.clone())?;
    assert!(source.get_entry(7).map_or(false, |e| matches!(e, pdf_store::XrefEntry::Compressed { .. })));

    let (output, _) = rewrite_bytes(pdf, &RewriteOptions::new())?;
    let text = String::from_utf8_lossy(&output);
    assert!(!text.contains("/ObjStm"));
    assert!(!text.contains("/XRef"));

    let mut doc = Document::from_bytes(output)?;
    assert!(doc.object_numbers().iter().all(|&n| n <= 11));
    assert_eq!(doc.load_object(7)?, source.load_object(7)?);
    Ok(())
}

#[test_log::test]
fn test_incremental_update_wins() -> PDFResult<()> {
    let info = Object::Dictionary(pdf_store::dictionary! { "Title" => Object::string("Updated") });
    let pdf = append_update(sample_pdf(), &[(7, info.clone())], 12);

    let (output, _) = rewrite_bytes(pdf, &RewriteOptions::new().garbage_level(1))?;
    let mut doc = Document::from_bytes(output)?;
    assert_eq!(*doc.load_object(7)?, info);
    Ok(())
}

#[test_log::test]
fn test_dangling_length_is_written_direct() -> PDFResult<()> {
    let content = pdf_store::encode_flate(CONTENT)?;
    let pdf = sample_builder()
        .stream(
            4,
            pdf_store::dictionary! {
                "Filter" => Object::name("FlateDecode"),
                "Length" => Object::reference(40, 0),
            },
            &content,
        )
        .build();

    let mut source = Document::from_bytes(pdf.clone())?;
    let trailer = source.trailer().clone();
    assert!(!sweep(&mut source, &trailer).contains(&40));

    let (output, _) = rewrite_bytes(pdf, &RewriteOptions::new().garbage_level(2))?;
    let mut doc = Document::from_bytes(output)?;
    let page = doc.page_ids()?[0];
    let contents = doc.resolve(page)?.as_dict()?.get_reference("Contents");
    let number = contents.map(|id| id.number).unwrap_or_default();

    let stream = doc.load_object(number)?;
    let length = stream.as_stream()?.dict.get("Length").cloned();
    assert_eq!(length, Some(Object::Integer(content.len() as i64)));
    assert_eq!(doc.raw_bytes(number)?, content);
    assert_eq!(doc.decoded_bytes(number)?, CONTENT);
    Ok(())
}

#[test_log::test]
fn test_missing_reference_becomes_null() -> PDFResult<()> {
    let pdf = sample_builder()
        .object(1, Object::Dictionary(pdf_store::dictionary! {
            "Type" => Object::name("Catalog"),
            "Pages" => Object::reference(2, 0),
            "Missing" => Object::reference(40, 0),
        }))
        .build();
    let (output, _) = rewrite_bytes(pdf, &RewriteOptions::new().garbage_level(2))?;
    let mut doc = Document::from_bytes(output)?;
    let catalog = doc.catalog()?;
    // Null dictionary entries are dropped when parsed
    assert!(!catalog.as_dict()?.has("Missing"));
    Ok(())
}

#[test_log::test]
fn test_page_subset() -> PDFResult<()> {
    let options = RewriteOptions::new().garbage_level(2).page_subset("1");
    let (output, _) = rewrite_bytes(sample_pdf(), &options)?;
    let mut doc = Document::from_bytes(output)?;
    assert_eq!(doc.page_count()?, 1);

    let err = rewrite_bytes(sample_pdf(), &RewriteOptions::new().page_subset("2")).unwrap_err();
    assert!(err.is_structure_error());
    assert!(err.to_string().contains("'2'"));
    Ok(())
}

#[rstest]
#[case(EncryptionAlgorithm::RC4_40)]
#[case(EncryptionAlgorithm::RC4_128)]
#[case(EncryptionAlgorithm::AES_128)]
#[case(EncryptionAlgorithm::AES_256)]
fn test_encrypted_rewrite_is_plaintext(#[case] algorithm: EncryptionAlgorithm) -> PDFResult<()> {
    let pdf = encrypted_pdf(algorithm, "user", "owner");

    let locked = rewrite_bytes(pdf.clone(), &RewriteOptions::new()).unwrap_err();
    assert!(locked.is_auth_error());
    let wrong = rewrite_bytes(pdf.clone(), &RewriteOptions::new().password("guess")).unwrap_err();
    assert!(wrong.is_auth_error());

    for password in ["user", "owner"] {
        let options = RewriteOptions::new().garbage_level(3).password(password);
        let (output, report) = rewrite_bytes(pdf.clone(), &options)?;
        assert!(!report.renumbered, "encrypted documents keep their numbers");
        assert_eq!(report.objects_merged, 0);

        let mut doc = Document::from_bytes(output)?;
        assert!(!doc.is_encrypted());
        assert!(!doc.trailer().has("Encrypt"));
        assert_eq!(doc.decoded_bytes(4)?, CONTENT);
        let info = doc.load_object(7)?;
        assert_eq!(info.as_dict()?.get_string("Title"), Some(&b"Sample"[..]));
    }
    Ok(())
}

#[test_log::test]
fn test_encrypted_empty_user_password_opens() -> PDFResult<()> {
    let pdf = encrypted_pdf(EncryptionAlgorithm::AES_128, "", "owner");
    let (output, report) = rewrite_bytes(pdf, &RewriteOptions::new().garbage_level(1))?;
    let numbers: BTreeSet<u32> = Document::from_bytes(output)?.object_numbers().into_iter().collect();
    assert!(!numbers.contains(&12));
    assert_eq!(report.objects_written, 8);
    Ok(())
}
