use super::office::*;
use super::*;
use ctxutils::error::{ParseErrorKind, classify};
use time::macros::datetime;

fn guid_bytes(guid: &GUID) -> Vec<u8> {
    let (data1, data2, data3, data4) = guid.fields();
    let mut ret = data1.to_le_bytes().to_vec();
    ret.extend(data2.to_le_bytes());
    ret.extend(data3.to_le_bytes());
    ret.extend(data4);
    ret
}

/// Builds a single set PropertySetStream out of (pid, serialized value) pairs
fn build_stream(fmtid: &GUID, props: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut offset = 8 + 8 * props.len();
    let mut table = Vec::new();
    let mut values: Vec<u8> = Vec::new();
    for (pid, value) in props {
        table.extend(pid.to_le_bytes());
        table.extend((offset as u32).to_le_bytes());
        offset += value.len();
        values.extend(value);
    }
    let mut stream = vec![0xfe, 0xff, 0x00, 0x00, 0x06, 0x00, 0x02, 0x00];
    stream.extend([0u8; 16]);
    stream.extend(1u32.to_le_bytes());
    stream.extend(guid_bytes(fmtid));
    stream.extend(0x30u32.to_le_bytes());
    stream.extend((offset as u32).to_le_bytes());
    stream.extend((props.len() as u32).to_le_bytes());
    stream.extend(table);
    stream.extend(values);
    stream
}

fn cp1252() -> (u32, Vec<u8>) {
    (PID_CODEPAGE, vec![0x02, 0x00, 0x00, 0x00, 0xe4, 0x04, 0x00, 0x00])
}

fn kind(err: &io::Error) -> Option<ParseErrorKind> {
    classify(err)
}

#[test]
fn test_oleps_1() -> Result<(), io::Error> {
    let data: &[u8] = &[
        0xFE, 0xFF, 0x00, 0x00, 0x06, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xE0, 0x85,
        0x9F, 0xF2, 0xF9, 0x4F, 0x68, 0x10, 0xAB, 0x91, 0x08, 0x00, 0x2B, 0x27, 0xB3, 0xD9, 0x30,
        0x00, 0x00, 0x00, 0x8C, 0x01, 0x00, 0x00, 0x12, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x98, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00,
        0x00, 0xB8, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x00, 0x00, 0x05, 0x00,
        0x00, 0x00, 0xD0, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xDC, 0x00, 0x00, 0x00, 0x07,
        0x00, 0x00, 0x00, 0xE8, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0xFC, 0x00, 0x00, 0x00,
        0x09, 0x00, 0x00, 0x00, 0x10, 0x01, 0x00, 0x00, 0x12, 0x00, 0x00, 0x00, 0x1C, 0x01, 0x00,
        0x00, 0x0A, 0x00, 0x00, 0x00, 0x3C, 0x01, 0x00, 0x00, 0x0B, 0x00, 0x00, 0x00, 0x48, 0x01,
        0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x54, 0x01, 0x00, 0x00, 0x0D, 0x00, 0x00, 0x00, 0x60,
        0x01, 0x00, 0x00, 0x0E, 0x00, 0x00, 0x00, 0x6C, 0x01, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00,
        0x74, 0x01, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x7C, 0x01, 0x00, 0x00, 0x13, 0x00, 0x00,
        0x00, 0x84, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0xE4, 0x04, 0x00, 0x00, 0x1E, 0x00,
        0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x4A, 0x6F, 0x65, 0x27, 0x73, 0x20, 0x64, 0x6F, 0x63,
        0x75, 0x6D, 0x65, 0x6E, 0x74, 0x00, 0x00, 0x1E, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
        0x4A, 0x6F, 0x62, 0x00, 0x1E, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x4A, 0x6F, 0x65,
        0x00, 0x1E, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1E, 0x00,
        0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1E, 0x00, 0x00, 0x00, 0x0C,
        0x00, 0x00, 0x00, 0x4E, 0x6F, 0x72, 0x6D, 0x61, 0x6C, 0x2E, 0x64, 0x6F, 0x74, 0x6D, 0x00,
        0x1E, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x43, 0x6F, 0x72, 0x6E, 0x65, 0x6C, 0x69,
        0x75, 0x73, 0x00, 0x00, 0x00, 0x1E, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x36, 0x36,
        0x00, 0x00, 0x1E, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00, 0x4D, 0x69, 0x63, 0x72, 0x6F,
        0x73, 0x6F, 0x66, 0x74, 0x20, 0x4F, 0x66, 0x66, 0x69, 0x63, 0x65, 0x20, 0x57, 0x6F, 0x72,
        0x64, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x6E, 0xD9, 0xA2, 0x42, 0x00, 0x00,
        0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x16, 0xD0, 0xA1, 0x4E, 0x8E, 0xC6, 0x01, 0x40, 0x00,
        0x00, 0x00, 0x00, 0x1C, 0xF2, 0xD5, 0x2A, 0xCE, 0xC6, 0x01, 0x40, 0x00, 0x00, 0x00, 0x00,
        0x3C, 0xDC, 0x73, 0xDD, 0x80, 0xC8, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, 0xE5, 0x0D, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x38, 0x4F, 0x00,
        0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    let mut reader = Cursor::new(data);
    let oleps = OlePS::new(&mut reader)?;
    let header = &oleps.header;
    assert_eq!(header.byte_order, 0xFFFE);
    assert_eq!(header.version, 0);
    assert_eq!(header.system_identifier, 0x00020006);
    assert!(header.clsid.is_null());
    assert_eq!(header.num_property_sets, 1);
    assert_eq!(header.sets().len(), 1);
    assert_eq!(
        header.fmtid0.to_string().to_uppercase(),
        "F29F85E0-4FF9-1068-AB91-08002B27B3D9"
    );
    assert_eq!(header.fmtid0, FMTID_SUMMARY_INFORMATION);
    assert_eq!(header.offset0, 0x30);
    assert_eq!(header.fmtid1, None);
    assert!(oleps.anomalies.is_empty());
    assert!(!oleps.is_partial());
    assert_eq!(oleps.property_sets().len(), 1);

    let property_set = &oleps.property_sets()[0];
    assert_eq!(property_set.size, 0x0000018C);
    assert_eq!(property_set.num_properties, 18);
    assert_eq!(property_set.entries.len(), 18);
    assert_eq!(property_set.codepage, 1252);
    assert!(!property_set.missing_cp);
    assert!(!property_set.multiple_cps);

    let expected_ids_and_offsets: [(u32, u32); 18] = [
        (PID_CODEPAGE, 0x98),
        (0x02, 0xA0),
        (0x03, 0xB8),
        (0x04, 0xC4),
        (0x05, 0xD0),
        (0x06, 0xDC),
        (0x07, 0xE8),
        (0x08, 0xFC),
        (0x09, 0x110),
        (0x12, 0x11C),
        (0x0A, 0x13C),
        (0x0B, 0x148),
        (0x0C, 0x154),
        (0x0D, 0x160),
        (0x0E, 0x16C),
        (0x0F, 0x174),
        (0x10, 0x17C),
        (0x13, 0x184),
    ];
    for (entry, (pid, offset)) in property_set.entries.iter().zip(expected_ids_and_offsets) {
        assert_eq!(entry.property_identifier, pid);
        assert_eq!(entry.offset, offset);
    }
    assert_eq!(property_set.entries[1].value_type, Some(VT_LPSTR));
    assert_eq!(property_set.entries[1].size, Some(0x18));

    let property: Vec<&Property> = property_set.entries.iter().map(|e| &e.property).collect();
    if let Property::TypedPropertyValue(TypedPropertyValue::I2(codepage)) = property[0] {
        assert_eq!(*codepage, 0x04E4);
    } else {
        panic!("Invalid Property");
    }
    let expected_strings = [
        "Joe's document",
        "Job",
        "Joe",
        "",
        "",
        "Normal.dotm",
        "Cornelius",
        "66",
        "Microsoft Office Word",
    ];
    for (p, expected) in property[1..10].iter().zip(expected_strings) {
        if let Property::TypedPropertyValue(TypedPropertyValue::LPStr(codepage_string)) = p {
            assert!(!codepage_string.is_winunicode());
            assert!(codepage_string.nul_terminated);
            assert_eq!(codepage_string.decode().as_deref(), Some(expected));
            assert_eq!(codepage_string.to_string(), expected);
        } else {
            panic!("Invalid Property");
        }
    }
    assert_eq!(property[1].as_vt_string().as_deref(), Some("Joe's document"));
    if let Property::TypedPropertyValue(TypedPropertyValue::Filetime(filetime)) = property[10] {
        let duration = filetime.as_duration().expect("Valid duration expected");
        assert_eq!(duration, time::Duration::seconds((7 * 60 + 57) * 60));
    } else {
        panic!("Invalid Property");
    }
    let expected_dates = [
        datetime!(2006-06-12 18:33:00 UTC),
        datetime!(2006-09-02 00:58:00 UTC),
        datetime!(2008-03-08 05:30:00 UTC),
    ];
    for (p, expected) in property[11..14].iter().zip(expected_dates) {
        if let Property::TypedPropertyValue(TypedPropertyValue::Filetime(filetime)) = p {
            assert_eq!(filetime.as_datetime(), Some(expected));
        } else {
            panic!("Invalid Property");
        }
    }
    let expected_counts = [14, 3557, 20_280, 0];
    for (p, expected) in property[14..].iter().zip(expected_counts) {
        if let Property::TypedPropertyValue(TypedPropertyValue::I4(value)) = p {
            assert_eq!(*value, expected);
        } else {
            panic!("Invalid Property");
        }
    }
    Ok(())
}

#[test]
fn test_oleps_2() -> Result<(), io::Error> {
    let data: &[u8] = &[
        0xFE, 0xFF, 0x01, 0x00, 0x06, 0x00, 0x02, 0x00, 0x53, 0xFF, 0x4B, 0x99, 0xF9, 0xDD, 0xAD,
        0x42, 0xA5, 0x6A, 0xFF, 0xEA, 0x36, 0x17, 0xAC, 0x16, 0x01, 0x00, 0x00, 0x00, 0x01, 0x18,
        0x00, 0x20, 0xE6, 0x5D, 0xD1, 0x11, 0x8E, 0x38, 0x00, 0xC0, 0x4F, 0xB9, 0x38, 0x6D, 0x30,
        0x00, 0x00, 0x00, 0xDC, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x58, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x60, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        0x80, 0x68, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x70, 0x00, 0x00, 0x00, 0x04, 0x00,
        0x00, 0x00, 0x38, 0x01, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x4C, 0x01, 0x00, 0x00, 0x07,
        0x00, 0x00, 0x00, 0x70, 0x01, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x7C, 0x01, 0x00, 0x00,
        0x27, 0x00, 0x00, 0x00, 0x94, 0x01, 0x00, 0x00, 0x92, 0x00, 0x00, 0x00, 0xC0, 0x01, 0x00,
        0x00, 0x02, 0x00, 0x00, 0x00, 0xB0, 0x04, 0x00, 0x00, 0x13, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x09, 0x08, 0x13, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x04,
        0x00, 0x00, 0x00, 0x0E, 0x00, 0x00, 0x00, 0x44, 0x00, 0x69, 0x00, 0x73, 0x00, 0x70, 0x00,
        0x6C, 0x00, 0x61, 0x00, 0x79, 0x00, 0x43, 0x00, 0x6F, 0x00, 0x6C, 0x00, 0x6F, 0x00, 0x75,
        0x00, 0x72, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x4D, 0x00,
        0x79, 0x00, 0x53, 0x00, 0x74, 0x00, 0x72, 0x00, 0x65, 0x00, 0x61, 0x00, 0x6D, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x0B, 0x00, 0x00, 0x00, 0x50, 0x00, 0x72, 0x00,
        0x69, 0x00, 0x63, 0x00, 0x65, 0x00, 0x28, 0x00, 0x47, 0x00, 0x42, 0x00, 0x50, 0x00, 0x29,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x4D, 0x00,
        0x79, 0x00, 0x53, 0x00, 0x74, 0x00, 0x6F, 0x00, 0x72, 0x00, 0x61, 0x00, 0x67, 0x00, 0x65,
        0x00, 0x00, 0x00, 0x27, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x00, 0x00, 0x43, 0x00, 0x61, 0x00,
        0x73, 0x00, 0x65, 0x00, 0x53, 0x00, 0x65, 0x00, 0x6E, 0x00, 0x73, 0x00, 0x69, 0x00, 0x74,
        0x00, 0x69, 0x00, 0x76, 0x00, 0x65, 0x00, 0x00, 0x00, 0x92, 0x00, 0x00, 0x00, 0x0E, 0x00,
        0x00, 0x00, 0x43, 0x00, 0x41, 0x00, 0x53, 0x00, 0x45, 0x00, 0x53, 0x00, 0x45, 0x00, 0x4E,
        0x00, 0x53, 0x00, 0x49, 0x00, 0x54, 0x00, 0x49, 0x00, 0x56, 0x00, 0x45, 0x00, 0x00, 0x00,
        0x08, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x47, 0x00, 0x72, 0x00, 0x65, 0x00, 0x79,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x49, 0x00, 0x00, 0x00, 0xCA, 0x84, 0x95, 0xF9, 0x23, 0xCA,
        0x0B, 0x47, 0x83, 0x94, 0x22, 0x01, 0x77, 0x90, 0x7A, 0xAD, 0x0C, 0x00, 0x00, 0x00, 0x70,
        0x00, 0x72, 0x00, 0x6F, 0x00, 0x70, 0x00, 0x36, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00,
        0x00, 0x50, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x45, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x00,
        0x00, 0x70, 0x00, 0x72, 0x00, 0x6F, 0x00, 0x70, 0x00, 0x31, 0x00, 0x32, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x10, 0x20, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03,
        0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x03, 0xF8, 0x14, 0x17, 0x12, 0x87, 0x45, 0x29, 0x25, 0x11, 0x33, 0x56, 0x79, 0xA2, 0x9C,
        0x00, 0x0C, 0x10, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00, 0xA9, 0x00,
        0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0xA9, 0x00, 0x76, 0x99, 0x3B, 0x22, 0x10, 0x9C,
    ];

    let mut reader = Cursor::new(data);
    let oleps = OlePS::new(&mut reader)?;
    let header = &oleps.header;
    assert_eq!(header.byte_order, 0xFFFE);
    assert_eq!(header.version, 1);
    assert_eq!(header.system_identifier, 0x00020006);
    assert_eq!(
        header.clsid.to_string().to_uppercase(),
        "994BFF53-DDF9-42AD-A56A-FFEA3617AC16"
    );
    assert_eq!(header.num_property_sets, 1);
    assert_eq!(
        header.fmtid0.to_string().to_uppercase(),
        "20001801-5DE6-11D1-8E38-00C04FB9386D"
    );
    assert_eq!(header.offset0, 0x30);

    let property_set = &oleps.property_sets()[0];
    assert_eq!(property_set.size, 0x000001DC);
    assert_eq!(property_set.num_properties, 10);
    assert_eq!(property_set.entries.len(), 10);
    assert_eq!(property_set.codepage, CP_WINUNICODE);
    assert!(!property_set.is_partial());

    let expected_ids_and_offsets: [(u32, u32); 10] = [
        (PID_CODEPAGE, 0x58),
        (PID_LOCALE, 0x60),
        (0x80000001, 0x68),
        (PID_DICTIONARY, 0x70),
        (0x04, 0x138),
        (0x06, 0x14C),
        (0x07, 0x170),
        (0x0C, 0x17C),
        (0x27, 0x194),
        (0x92, 0x1C0),
    ];
    for (entry, (pid, offset)) in property_set.entries.iter().zip(expected_ids_and_offsets) {
        assert_eq!(entry.property_identifier, pid);
        assert_eq!(entry.offset, offset);
    }
    assert_eq!(property_set.entries[3].value_type, None);
    assert_eq!(property_set.entries[3].size, Some(0x138 - 0x70));

    let property: Vec<&Property> = property_set.entries.iter().map(|e| &e.property).collect();
    let codepage = match property[0] {
        Property::TypedPropertyValue(TypedPropertyValue::I2(value)) => *value,
        _ => panic!("Invalid Property"),
    };
    assert_eq!(codepage, 0x04B0);
    let locale = match property[1] {
        Property::TypedPropertyValue(TypedPropertyValue::UI4(value)) => *value,
        _ => panic!("Invalid Property"),
    };
    assert_eq!(locale, 0x08090000);
    let behavior = match property[2] {
        Property::TypedPropertyValue(TypedPropertyValue::UI4(value)) => *value,
        _ => panic!("Invalid Property"),
    };
    assert_eq!(behavior, 1);
    let dictionary = match property[3] {
        Property::Dictionary(dictionary) => dictionary,
        _ => panic!("Invalid Property"),
    };
    assert_eq!(dictionary.num_entries, 6);
    assert_eq!(dictionary.entries.len(), 6);
    assert!(dictionary.entries.iter().all(|e| e.name.is_winunicode()));
    let names = dictionary.as_map();
    assert_eq!(
        names,
        BTreeMap::from([
            (4, "DisplayColour".to_string()),
            (6, "MyStream".to_string()),
            (7, "Price(GBP)".to_string()),
            (12, "MyStorage".to_string()),
            (39, "CaseSensitive".to_string()),
            (146, "CASESENSITIVE".to_string()),
        ])
    );
    assert_eq!(property_set.dictionary(), Some(dictionary));
    assert_eq!(dictionary.name_of(7).as_deref(), Some("Price(GBP)"));

    let display_colour = match property[4] {
        Property::TypedPropertyValue(TypedPropertyValue::BStr(value)) => value,
        _ => panic!("Invalid Property"),
    };
    assert!(display_colour.is_winunicode());
    assert!(!display_colour.nul_terminated);
    assert_eq!(display_colour.to_string(), "Grey");

    let my_stream = match property[5] {
        Property::TypedPropertyValue(TypedPropertyValue::VersionedStream(value)) => value,
        _ => panic!("Invalid Property"),
    };
    assert_eq!(
        my_stream.version_guid.to_string().to_uppercase(),
        "F99584CA-CA23-470B-8394-220177907AAD"
    );
    assert!(my_stream.stream_name.is_winunicode());
    assert_eq!(my_stream.stream_name.to_string(), "prop6");

    let price_gbp = match property_set.get(7) {
        Some(Property::TypedPropertyValue(TypedPropertyValue::CY(value))) => value,
        _ => panic!("Invalid Property"),
    };
    assert_eq!(price_gbp.value, 133_1200);
    assert_eq!(price_gbp.to_string(), "133.12");

    let my_storage = match property[7] {
        Property::TypedPropertyValue(TypedPropertyValue::StoredObject(value)) => value,
        _ => panic!("Invalid property"),
    };
    assert!(my_storage.is_winunicode());
    assert_eq!(my_storage.to_string(), "prop12");

    let array = match property[8] {
        Property::TypedPropertyValue(TypedPropertyValue::Array(value)) => value,
        _ => panic!("Invalid property"),
    };
    assert_eq!(array.value_type, VT_ARRAY | VT_I1);
    assert_eq!(array.header.value_type, 0x00000010);
    assert_eq!(array.header.num_dimensions, 2);
    assert_eq!(
        array.dimensions,
        vec![
            ArrayDimension {
                size: 3,
                index_offset: -1
            },
            ArrayDimension {
                size: 5,
                index_offset: 0
            }
        ]
    );
    assert_eq!(array.declared_len(), 15);
    assert!(!array.truncated);
    let values: Vec<i8> = array
        .data
        .iter()
        .map(|v| match v {
            TypedPropertyValue::I1(v) => *v,
            _ => panic!("Invalid array entry"),
        })
        .collect();
    assert_eq!(
        values,
        [3, -8, 20, 23, 18, -121, 69, 41, 37, 17, 51, 86, 121, -94, -100]
    );
    assert_eq!(property_set.entries[8].size, Some(0x1C0 - 0x194));

    let vector = match property[9] {
        Property::TypedPropertyValue(TypedPropertyValue::Vector(value)) => value,
        _ => panic!("Invalid property"),
    };
    assert_eq!(vector.value_type, VT_VECTOR | VT_VARIANT);
    assert_eq!(vector.declared_len, 2);
    assert_eq!(
        vector.data,
        vec![
            TypedPropertyValue::UI1(169),
            TypedPropertyValue::I8(-7201218164792360791)
        ]
    );
    Ok(())
}

#[test]
fn test_oleps_3() -> Result<(), io::Error> {
    #[rustfmt::skip]
    let data: [u8; 0x15c] = [
        /* 0x0000 */ 0xfe,0xff, // ByteOrder
        /* 0x0002 */ 0x00,0x00, // Version
        /* 0x0004 */ 0x06,0x00,0x02,0x00, // SystemIdentifier
        /* 0x0008 */ 0xf0,0xe1,0xd2,0xc3,0xb4,0xa5,0x86,0x87, // CLSID
        /* 0x0010 */ 0x78,0x69,0x5a,0x4b,0x3c,0x2d,0x1e,0x0f, // CLSID
        /* 0x0018 */ 0x01,0x00,0x00,0x00, // NumPropertySets
        /* 0x001c */ 0xe0,0x85,0x9f,0xf2,0xf9,0x4f,0x68,0x10, // FMTID0
        /* 0x0024 */ 0xab,0x91,0x08,0x00,0x2b,0x27,0xb3,0xd9, // FMTID0
        /* 0x002c */ 0x30,0x00,0x00,0x00, // Offset0
        /* 0x0030 */ 0x2c,0x01,0x00,0x00, // Size
        /* 0x0034 */ 0x0f,0x00,0x00,0x00, // NumProperties
        /* 0x0038 */ 0x00,0x00,0x37,0x13,0x80,0x00,0x00,0x00, // Empty[1]
        /* 0x0040 */ 0x01,0x00,0x00,0x00,0x88,0x00,0x00,0x00, // CodePage[2]
        /* 0x0048 */ 0x01,0x00,0x37,0x13,0x90,0x00,0x00,0x00, // Signed[3]
        /* 0x0050 */ 0x02,0x00,0x37,0x13,0x98,0x00,0x00,0x00, // Float[4]
        /* 0x0058 */ 0x03,0x00,0x37,0x13,0xa0,0x00,0x00,0x00, // Unsigned[5]
        /* 0x0060 */ 0x04,0x00,0x37,0x13,0xa8,0x00,0x00,0x00, // Decimal[6]
        /* 0x0068 */ 0x05,0x00,0x37,0x13,0xbc,0x00,0x00,0x00, // Unsigned[7]
        /* 0x0070 */ 0x06,0x00,0x37,0x13,0xc8,0x00,0x00,0x00, // String[8]
        /* 0x0078 */ 0x07,0x00,0x37,0x13,0xd8,0x00,0x00,0x00, // Null[9]
        /* 0x0080 */ 0x08,0x00,0x37,0x13,0xe0,0x00,0x00,0x00, // LPWSTR[10]
        /* 0x0088 */ 0x09,0x00,0x37,0x13,0xf0,0x00,0x00,0x00, // Bool[11]
        /* 0x0090 */ 0x0a,0x00,0x37,0x13,0xf8,0x00,0x00,0x00, // Bool[12]
        /* 0x0098 */ 0x0b,0x00,0x37,0x13,0x00,0x01,0x00,0x00, // FILETIME[13]
        /* 0x00a0 */ 0x0c,0x00,0x37,0x13,0x0c,0x01,0x00,0x00, // BLOB[14]
        /* 0x00a8 */ 0x0d,0x00,0x37,0x13,0x20,0x01,0x00,0x00, // CY[15]
        /* 0x00b0 */ 0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00, // [1] EMPTY
        /* 0x00b8 */ 0x02,0x00,0x00,0x00,0x52,0x03,0x00,0x00, // [2] I2(850)
        /* 0x00c0 */ 0x03,0x00,0x00,0x00,0xab,0xac,0x37,0x13, // [3] I4(0x1337acab)
        /* 0x00c8 */ 0x04,0x00,0x00,0x00,0xc3,0xf5,0x48,0x40, // [4] R4(3.14)
        /* 0x00d0 */ 0x11,0x00,0x00,0x00,0xa5,0x00,0x00,0x00, // [5] UI1(0xa5)
        /* 0x00d8 */ 0x0e,0x00,0x00,0x00,0x00,0x00,0x0a,0x80, // [6] DECIMAL(-9876543210.0123456789)
        /* 0x00e0 */ 0x05,0x00,0x00,0x00,0x15,0x35,0xd2,0x9f,
        /* 0x00e8 */ 0x36,0x4d,0xa5,0x5a,
        /* 0x00ec */ 0x15,0x00,0x00,0x00,0x0d,0xd0,0x37,0x13, // [7] UI8(0xdeadbeef1337d00d)
        /* 0x00f4 */ 0xef,0xbe,0xad,0xde,
        /* 0x00f8 */ 0x1e,0x00,0x00,0x00,0x07,0x00,0x00,0x00, // [8] LPSTR - UTF-8(ABC123)
        /* 0x0100 */ 0x41,0x42,0x43,0x31,0x32,0x33,0x00,0x00,
        /* 0x0108 */ 0x01,0x00,0x00,0x00,0x00,0x00,0x00,0x00, // [9] NULL
        /* 0x0110 */ 0x1f,0x00,0x00,0x00,0x04,0x00,0x00,0x00, // [10] LPWSTR("←⏭➘")
        /* 0x0118 */ 0x90,0x21,0xed,0x23,0x98,0x27,0x00,0x00,
        /* 0x0120 */ 0x0b,0x00,0x00,0x00,0x01,0x00,0x00,0x00, // [11] Bool(true)
        /* 0x0128 */ 0x0b,0x00,0x00,0x00,0x00,0x00,0x00,0x00, // [12] Bool(false)
        /* 0x0130 */ 0x40,0x00,0x00,0x00,0x80,0x80,0xf4,0xed, // [13] DateTime(2021-01-02T03:04:05)
        /* 0x0138 */ 0xb3,0xe0,0xd6,0x01,
        /* 0x013c */ 0x41,0x00,0x00,0x00,0x09,0x00,0x00,0x00, // [14] Unsupported(BLOB[1..9])
        /* 0x0144 */ 0x01,0x02,0x03,0x04,0x05,0x06,0x07,0x08,
        /* 0x014c */ 0x09,0x0a,0x00,0x00,
        /* 0x0150 */ 0x06,0x00,0x00,0x00,0x00,0xe4,0x0b,0x54, // [15] Decimal(1mln)
        /* 0x0158 */ 0x02,0x00,0x00,0x00
    ];

    let mut reader = Cursor::new(data);
    let oleps = OlePS::new(&mut reader)?;
    let header = &oleps.header;
    assert_eq!(header.byte_order, 0xFFFE);
    assert_eq!(header.version, 0);
    assert_eq!(header.system_identifier, 0x00020006);
    assert_eq!(
        header.clsid.to_string(),
        "c3d2e1f0-a5b4-8786-7869-5a4b3c2d1e0f"
    );
    assert_eq!(header.num_property_sets, 1);
    assert_eq!(header.fmtid0, FMTID_SUMMARY_INFORMATION);

    let property_set = &oleps.property_sets()[0];
    assert_eq!(property_set.num_properties, 15);
    assert_eq!(property_set.entries.len(), 15);
    assert_eq!(property_set.codepage, 850);
    assert_eq!(property_set.entries[0].property_identifier, 0x13370000);
    assert_eq!(property_set.entries[1].property_identifier, PID_CODEPAGE);
    assert_eq!(oleps.properties_0().count(), 15);
    assert_eq!(oleps.properties_1().count(), 0);

    let property: Vec<&Property> = oleps.properties().map(|(_, p)| p).collect();
    let value = |i: usize| match property[i] {
        Property::TypedPropertyValue(v) => v.clone(),
        _ => panic!("Invalid property"),
    };
    assert_eq!(value(0), TypedPropertyValue::Empty);
    assert_eq!(value(1), TypedPropertyValue::I2(850));
    assert_eq!(value(2), TypedPropertyValue::I4(0x1337acab));
    #[allow(clippy::approx_constant)]
    let expected = 3.14f32;
    assert_eq!(value(3), TypedPropertyValue::R4(expected));
    assert_eq!(value(4), TypedPropertyValue::UI1(0xa5));
    let decimal = Decimal::new(-98765432100123456789i128, 10);
    assert_eq!(value(5), TypedPropertyValue::Decimal(decimal));
    assert_eq!(decimal.to_string(), "-9876543210.0123456789");
    assert_eq!(value(6), TypedPropertyValue::UI8(0xdeadbeef1337d00d));

    // No decoder for CP850: the text is rendered lossily
    let TypedPropertyValue::LPStr(s) = value(7) else {
        panic!("Invalid property");
    };
    assert_eq!(s.decode(), None);
    assert_eq!(s.to_string(), "ABC123");
    assert_eq!(property[7].as_vt_string().as_deref(), Some("ABC123"));

    assert_eq!(value(8), TypedPropertyValue::Null);
    let TypedPropertyValue::LPWStr(s) = value(9) else {
        panic!("Invalid property");
    };
    assert_eq!(s.to_string(), "←⏭➘");
    assert_eq!(value(10), TypedPropertyValue::Bool(true));
    assert_eq!(value(11), TypedPropertyValue::Bool(false));
    let TypedPropertyValue::Filetime(ft) = value(12) else {
        panic!("Invalid property");
    };
    assert_eq!(ft.as_datetime(), Some(datetime!(2021-01-02 03:04:05 UTC)));
    let TypedPropertyValue::Blob(blob) = value(13) else {
        panic!("Invalid property");
    };
    assert_eq!(blob.size, 9);
    assert_eq!(blob.bytes, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    let TypedPropertyValue::CY(cy) = value(14) else {
        panic!("Invalid property");
    };
    assert_eq!(cy.value, 10_000_000_000);
    assert_eq!(cy.to_string(), "1000000");
    Ok(())
}

#[test]
fn stream_header() -> Result<(), io::Error> {
    let mut data: Vec<u8> = (0u8..0x30).collect();
    data[24..28].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    let header = PropertySetStreamHeader::new(&mut Cursor::new(&data))?;
    assert_eq!(header.num_property_sets, 1);
    assert_eq!(header.fmtid0, GUID::from_le_bytes(&data[28..44]).unwrap());
    assert_eq!(header.offset0, 0x2F2E2D2C);
    assert_eq!(header.fmtid1, None);
    assert_eq!(header.offset1, None);
    assert_eq!(header.sets().len(), 1);
    // Byte order 0x0100 and version 0x0302 are tolerated
    assert_eq!(header.byte_order, 0x0100);
    assert_eq!(header.anomalies.len(), 2);

    data[24] = 3;
    let err = PropertySetStreamHeader::new(&mut Cursor::new(&data)).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Invalid));

    data[24] = 2;
    let err = PropertySetStreamHeader::new(&mut Cursor::new(&data)).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Truncated));
    Ok(())
}

#[test]
fn currency() -> Result<(), io::Error> {
    let data = [0xa8, 0xf2, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff];
    let mut reader = Cursor::new(&data);
    let value =
        TypedPropertyValue::read_value(&mut reader, VT_CY, 1252, true, &Config::default())?;
    assert_eq!(reader.position(), 8);
    let TypedPropertyValue::CY(cy) = value else {
        panic!("Invalid value");
    };
    assert_eq!(cy.as_decimal(), Decimal::new(5305000, 4));
    assert_eq!(cy.as_decimal().to_string(), "530.5000");
    assert_eq!(cy.to_string(), "530.5");
    Ok(())
}

#[test]
#[rustfmt::skip]
fn unicode_dictionary() -> Result<(), io::Error> {
    let data = [
        0x01, 0x00, 0x00, 0x00, // NumEntries
        0x00, 0x00, 0x00, 0x00, // PropertyIdentifier
        0x04, 0x00, 0x00, 0x00, // Length (chars)
        b'a', 0x00, b'b', 0x00, b'c', 0x00, 0x00, 0x00,
        0xff, 0xff, 0xff, 0xff,
    ];
    let mut reader = Cursor::new(&data);
    let dictionary = Dictionary::new(&mut reader, CP_WINUNICODE, &Config::default())?;
    assert_eq!(reader.position(), 20);
    assert_eq!(dictionary.as_map(), BTreeMap::from([(0, "abc".to_string())]));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn ansi_dictionary() -> Result<(), io::Error> {
    let data = [
        0x02, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, b'a', b'b', 0x00,
        0x05, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, b'z', 0x00,
        0x00, 0x00, 0x00, // padding
        0xff, 0xff, 0xff, 0xff,
    ];
    let mut reader = Cursor::new(&data);
    let dictionary = Dictionary::new(&mut reader, 1252, &Config::default())?;
    assert_eq!(reader.position(), 28);
    assert_eq!(dictionary.num_entries, 2);
    // First name wins
    assert_eq!(dictionary.as_map(), BTreeMap::from([(5, "ab".to_string())]));

    let config = Config {
        max_dictionary_entries: 1,
        ..Config::default()
    };
    let err = Dictionary::new(&mut Cursor::new(&data), 1252, &config).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::OutOfRange));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn vector_sizes() -> Result<(), io::Error> {
    let config = Config::default();
    // 3 * I2: 4 + round_up_to_4(6)
    let data = [
        0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00,
        0xff, 0xff,
    ];
    let mut reader = Cursor::new(&data);
    let value = TypedPropertyValue::read_value(&mut reader, VT_VECTOR | VT_I2, 1252, true, &config)?;
    assert_eq!(reader.position(), 12);
    let TypedPropertyValue::Vector(v) = value else {
        panic!("Invalid value");
    };
    assert_eq!(v.data, vec![TypedPropertyValue::I2(1), TypedPropertyValue::I2(2), TypedPropertyValue::I2(3)]);
    assert!(!v.truncated);

    // 5 * UI1: 4 + round_up_to_4(5)
    let data = [
        0x05, 0x00, 0x00, 0x00, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x00, 0x00, 0x00,
    ];
    let mut reader = Cursor::new(&data);
    let value = TypedPropertyValue::read_value(&mut reader, VT_VECTOR | VT_UI1, 1252, true, &config)?;
    assert_eq!(reader.position(), 12);
    assert_eq!(value.value_type(), VT_VECTOR | VT_UI1);

    // LPSTR elements are padded each: 4 + (4 + 2 + 2) + (4 + 3 + 1)
    let data = [
        0x02, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00, b'a', 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, b'b', b'c', 0x00, 0x00,
        0xff,
    ];
    let mut reader = Cursor::new(&data);
    let value = TypedPropertyValue::read_value(&mut reader, VT_VECTOR | VT_LPSTR, 1252, true, &config)?;
    assert_eq!(reader.position(), 20);
    let TypedPropertyValue::Vector(v) = value else {
        panic!("Invalid value");
    };
    let strings: Vec<String> = v.data.iter().filter_map(|s| s.as_string()).collect();
    assert_eq!(strings, ["a", "bc"]);
    assert!(!v.truncated);

    // So are BSTR elements
    let data = [
        0x02, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, b'a', 0x00, b'b', 0x00,
        0x02, 0x00, 0x00, 0x00, b'c', b'd', 0x00, 0x00,
    ];
    let mut reader = Cursor::new(&data);
    let value = TypedPropertyValue::read_value(&mut reader, VT_VECTOR | VT_BSTR, 1252, true, &config)?;
    assert_eq!(reader.position(), 20);
    let TypedPropertyValue::Vector(v) = value else {
        panic!("Invalid value");
    };
    let strings: Vec<String> = v.data.iter().filter_map(|s| s.as_string()).collect();
    assert_eq!(strings, ["a\0b", "cd"]);
    assert!(!v.truncated);
    Ok(())
}

#[test]
#[rustfmt::skip]
fn variant_vector_strings() -> Result<(), io::Error> {
    let config = Config::default();
    let data = [
        0x02, 0x00, 0x00, 0x00,
        0x1e, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, b'a', b'b', 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00,
    ];
    let mut reader = Cursor::new(&data);
    let value = TypedPropertyValue::read_value(&mut reader, VT_VECTOR | VT_VARIANT, 1252, true, &config)?;
    assert_eq!(reader.position(), 24);
    let TypedPropertyValue::Vector(v) = value else {
        panic!("Invalid value");
    };
    assert_eq!(v.data.len(), 2);
    assert_eq!(v.data[0].as_string().as_deref(), Some("ab"));
    assert_eq!(v.data[1], TypedPropertyValue::I4(7));
    assert!(!v.truncated);
    Ok(())
}

#[test]
#[rustfmt::skip]
fn array_sizes() -> Result<(), io::Error> {
    let config = Config::default();
    // Header (8) + 1 dimension (8) + 3 * I2 (6), padded to 24
    let data = [
        0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x07, 0x00, 0x08, 0x00, 0x09, 0x00, 0x00, 0x00,
        0xff, 0xff,
    ];
    let mut reader = Cursor::new(&data);
    let value = TypedPropertyValue::read_value(&mut reader, VT_ARRAY | VT_I2, 1252, true, &config)?;
    assert_eq!(reader.position(), 24);
    let TypedPropertyValue::Array(a) = value else {
        panic!("Invalid value");
    };
    assert_eq!(a.dimensions[0].index_offset, 1);
    assert_eq!(a.data.len(), 3);

    // Header type disagreeing with the tag
    let err = TypedPropertyValue::read_value(&mut Cursor::new(&data), VT_ARRAY | VT_I4, 1252, true, &config)
        .unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Invalid));

    // Zero dimensions
    let data = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let err = TypedPropertyValue::read_value(&mut Cursor::new(&data), VT_ARRAY | VT_I2, 1252, true, &config)
        .unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Invalid));

    // Element count above the limit
    let data = [
        0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
        0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let limited = Config {
        max_sequence_items: 0x10000,
        ..Config::default()
    };
    let err = TypedPropertyValue::read_value(&mut Cursor::new(&data), VT_ARRAY | VT_I2, 1252, true, &limited)
        .unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::OutOfRange));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn lpstr_and_bstr() -> Result<(), io::Error> {
    let config = Config::default();
    let data = [
        0x06, 0x00, 0x00, 0x00, b'a', b'b', 0x00, b'c', b'd', 0x00, 0x00, 0x00,
    ];
    let mut reader = Cursor::new(&data);
    let lpstr = TypedPropertyValue::read_value(&mut reader, VT_LPSTR, 1252, true, &config)?;
    assert_eq!(reader.position(), 12);
    assert_eq!(lpstr.as_string().as_deref(), Some("ab"));

    let mut reader = Cursor::new(&data);
    let bstr = TypedPropertyValue::read_value(&mut reader, VT_BSTR, 1252, true, &config)?;
    assert_eq!(reader.position(), 12);
    assert_eq!(bstr.as_string().as_deref(), Some("ab\0cd"));
    let TypedPropertyValue::BStr(s) = bstr else {
        panic!("Invalid value");
    };
    assert_eq!(s.data, b"ab\0cd");
    Ok(())
}

#[test]
fn codepages() {
    assert_eq!(canonical_codepage(1252), 1252);
    assert_eq!(canonical_codepage(-535), 65001);
    assert_eq!(canonical_codepage(-1), 0xFFFF);
    assert_eq!(canonical_codepage(i32::from(0x04b0i16)), CP_WINUNICODE);
    assert_eq!(decode_codepage(b"caf\xe9", 1252).as_deref(), Some("café"));
    assert_eq!(
        decode_codepage(&[0x61, 0x00, 0x62, 0x00], CP_WINUNICODE).as_deref(),
        Some("ab")
    );
    assert_eq!(decode_codepage(b"abc", 850), None);
}

#[test]
fn negative_codepage_property() -> Result<(), io::Error> {
    // CodePage -535 stored as VT_I2 stands for UTF-8
    let stream = build_stream(
        &FMTID_USER_DEFINED_PROPERTIES,
        &[
            (PID_CODEPAGE, vec![0x02, 0x00, 0x00, 0x00, 0xe9, 0xfd, 0x00, 0x00]),
            (
                0x02,
                vec![0x1e, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0xc3, 0xa9, 0x00, 0x00],
            ),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    assert_eq!(ps.codepage, 65001);
    assert_eq!(ps.get(2).and_then(|p| p.as_vt_string()).as_deref(), Some("é"));
    Ok(())
}

#[test]
fn missing_and_multiple_codepages() -> Result<(), io::Error> {
    let i4 = vec![0x03, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00, 0x00];
    let stream = build_stream(&FMTID_USER_DEFINED_PROPERTIES, &[(0x02, i4.clone())]);
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    assert!(ps.missing_cp);
    assert!(!ps.multiple_cps);
    assert_eq!(ps.codepage, DEFAULT_CODEPAGE);

    let stream = build_stream(
        &FMTID_USER_DEFINED_PROPERTIES,
        &[
            cp1252(),
            (PID_CODEPAGE, vec![0x02, 0x00, 0x00, 0x00, 0xb0, 0x04, 0x00, 0x00]),
            (0x02, i4),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    assert!(!ps.missing_cp);
    assert!(ps.multiple_cps);
    assert_eq!(ps.codepage, 1252);
    assert!(!oleps.anomalies.is_empty());
    Ok(())
}

#[test]
#[rustfmt::skip]
fn truncated_vector_keeps_prefix() -> Result<(), io::Error> {
    let data = [
        0x04, 0x00, 0x00, 0x00,
        0x01, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00,
        0x03, 0x00,
    ];
    let value = TypedPropertyValue::read_value(
        &mut Cursor::new(&data),
        VT_VECTOR | VT_I4,
        1252,
        true,
        &Config::default(),
    )?;
    let TypedPropertyValue::Vector(v) = value else {
        panic!("Invalid value");
    };
    assert!(v.truncated);
    assert_eq!(v.declared_len, 4);
    assert_eq!(v.data, vec![TypedPropertyValue::I4(1), TypedPropertyValue::I4(2)]);

    let limited = Config {
        max_sequence_items: 3,
        ..Config::default()
    };
    let err = TypedPropertyValue::read_value(&mut Cursor::new(&data), VT_VECTOR | VT_I4, 1252, true, &limited)
        .unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::OutOfRange));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn unknown_types() {
    let config = Config::default();
    let data = [0u8; 32];
    for vt in [0x0099, VT_VARIANT, VT_VECTOR | VT_ARRAY | VT_I4, VT_VECTOR | VT_DECIMAL, VT_ARRAY | VT_LPSTR] {
        let err = TypedPropertyValue::read_value(&mut Cursor::new(&data), vt, 1252, true, &config).unwrap_err();
        assert_eq!(kind(&err), Some(ParseErrorKind::UnknownType), "type {vt:04x}");
    }

    // A variant sequence cannot nest sequences
    let data = [
        0x01, 0x00, 0x00, 0x00,
        0x03, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let err = TypedPropertyValue::read_value(&mut Cursor::new(&data), VT_VECTOR | VT_VARIANT, 1252, true, &config)
        .unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::UnknownType));

    // Non zero padding after the type
    let data = [0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
    let err = TypedPropertyValue::new(&mut Cursor::new(&data), 1252, &config).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Invalid));
}

#[test]
fn hresult() {
    let hr = Hresult { value: 0x8007000E };
    assert!(hr.severity());
    assert!(!hr.reserved());
    assert!(!hr.customer());
    assert!(!hr.ntstatus());
    assert!(!hr.msg_id());
    assert_eq!(hr.facility(), 7);
    assert_eq!(hr.code(), 0x000E);
    assert_eq!(
        serde_json::to_string(&hr).expect("serializable"),
        "\"0x8007000E\""
    );
}

#[test]
fn date() {
    let date = Date { value: 2.25 };
    assert_eq!(date.to_datetime(), Some(datetime!(1900-01-01 06:00)));
    let date = Date { value: f64::NAN };
    assert_eq!(date.to_datetime(), None);
    assert_eq!(serde_json::to_string(&date).expect("serializable"), "null");
}

#[test]
fn property_recovery() -> Result<(), io::Error> {
    let stream = build_stream(
        &FMTID_USER_DEFINED_PROPERTIES,
        &[
            cp1252(),
            (0x02, vec![0x99, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            (0x03, vec![0x03, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00, 0x00]),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    assert!(ps.is_partial());
    assert!(oleps.is_partial());
    assert!(ps.get(2).is_some_and(|p| p.is_invalid()));
    assert_eq!(ps.entries[1].value_type, Some(0x99));
    assert_eq!(ps.entries[1].size, None);
    assert_eq!(
        ps.get(3),
        Some(&Property::TypedPropertyValue(TypedPropertyValue::I4(42)))
    );
    Ok(())
}

#[test]
fn property_set_limits() -> Result<(), io::Error> {
    let stream = build_stream(&FMTID_USER_DEFINED_PROPERTIES, &[cp1252()]);

    // Declared size past the end of the stream
    let mut truncated = stream.clone();
    truncated.truncate(stream.len() - 2);
    let err = OlePS::new(&mut Cursor::new(&truncated)).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Truncated));

    // Property table larger than the set
    let mut bad = stream.clone();
    bad[0x34] = 0x10;
    let err = OlePS::new(&mut Cursor::new(&bad)).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::OutOfRange));

    // Declared size above the limit
    let mut huge = stream.clone();
    huge[0x30..0x34].copy_from_slice(&0x0300_0000u32.to_le_bytes());
    let err = OlePS::new(&mut Cursor::new(&huge)).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::OutOfRange));

    // The whole stream is bounded too
    let config = Config {
        max_property_set_size: 0x40,
        ..Config::default()
    };
    let err = OlePS::with_config(&mut Cursor::new(&stream), &config).unwrap_err();
    assert_eq!(kind(&err), Some(ParseErrorKind::Truncated));
    Ok(())
}

#[test]
fn second_set_failure() -> Result<(), io::Error> {
    let mut stream = build_stream(&FMTID_DOC_SUMMARY_INFORMATION, &[cp1252()]);
    // Turn into a two set stream whose second set is out of reach
    let set = stream.split_off(0x30);
    stream[0x18] = 2;
    stream.extend(guid_bytes(&FMTID_USER_DEFINED_PROPERTIES));
    stream.extend(0x1000u32.to_le_bytes());
    stream[0x2c..0x30].copy_from_slice(&0x44u32.to_le_bytes());
    stream.extend(set);
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    assert_eq!(oleps.header.num_property_sets, 2);
    assert_eq!(oleps.header.fmtid1, Some(FMTID_USER_DEFINED_PROPERTIES));
    assert_eq!(oleps.header.offset1, Some(0x1000));
    assert_eq!(oleps.property_sets().len(), 1);
    assert_eq!(oleps.anomalies.len(), 1);
    assert!(oleps.is_partial());
    Ok(())
}

#[test]
#[rustfmt::skip]
fn thumbnail() -> Result<(), io::Error> {
    let stream = build_stream(
        &FMTID_SUMMARY_INFORMATION,
        &[
            cp1252(),
            (PIDSI_THUMBNAIL, vec![
                0x47, 0x00, 0x00, 0x00, // VT_CF
                0x0c, 0x00, 0x00, 0x00, // size
                0xff, 0xff, 0xff, 0xff, // Windows clipboard format
                0x03, 0x00, 0x00, 0x00, // CF_METAFILEPICT
                0x01, 0x02, 0x03, 0x04,
            ]),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    let Some(Property::Office(OfficeProperty::VtThumbnail(thumb))) = ps.get(PIDSI_THUMBNAIL) else {
        panic!("Thumbnail not decoded");
    };
    assert_eq!(thumb.size, 12);
    assert_eq!(thumb.format, 0xffffffff);
    assert_eq!(thumb.secondary_format, Some(3));
    assert_eq!(thumb.data, [1, 2, 3, 4]);
    assert_eq!(ps.entries[1].size, Some(20));
    assert_eq!(ps.entries[1].value_type, Some(VT_CF));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn document_summary_overlays() -> Result<(), io::Error> {
    let heading_pairs = vec![
        0x0c, 0x10, 0x00, 0x00, // VT_VECTOR | VT_VARIANT
        0x04, 0x00, 0x00, 0x00, // 2 pairs
        0x1e, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, b'T', b'i', b't', b'l', b'e', 0x00,
        0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x1f, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00,
        b'H', 0, b'e', 0, b'a', 0, b'd', 0, b'i', 0, b'n', 0, b'g', 0, b's', 0, 0, 0, 0, 0,
        0x03, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
        0x00, 0x00, // padding
    ];
    let doc_parts = vec![
        0x1e, 0x10, 0x00, 0x00, // VT_VECTOR | VT_LPSTR
        0x03, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00, b'D', b'o', b'c', b'1', 0x00,
        0x02, 0x00, 0x00, 0x00, b'A', 0x00,
        0x06, 0x00, 0x00, 0x00, b'I', b'n', b't', b'r', b'o', 0x00,
        0x00, 0x00, 0x00, // padding
    ];
    let hlinks = vec![
        0x41, 0x00, 0x00, 0x00, 0x50, 0x00, 0x00, 0x00, // VT_BLOB, 80 bytes
        0x06, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44,
        0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x1f, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x00,
        b'h', 0, b't', 0, b't', 0, b'p', 0, b':', 0, b'/', 0, b'/', 0, b'a', 0, b'.', 0, b'b', 0, b'/', 0, 0, 0,
        0x1f, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let mut digsig = vec![0x41, 0x00, 0x00, 0x00, 0x34, 0x00, 0x00, 0x00];
    digsig.extend([
        0x2c, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x2e, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x34, 0x00, 0x00, 0x00,
        0x30, 0x82, 0x00, 0x00,
        b'V', 0x00, b'B', 0x00,
    ]);
    let stream = build_stream(
        &FMTID_DOC_SUMMARY_INFORMATION,
        &[
            cp1252(),
            (PIDDSI_HEADINGPAIR, heading_pairs),
            (PIDDSI_DOCPARTS, doc_parts),
            (PIDDSI_HLINKS, hlinks),
            (PIDDSI_DIGSIG, digsig),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    assert!(!ps.is_partial());

    let Some(Property::Office(OfficeProperty::VtHeadingPairs(hp))) = ps.get(PIDDSI_HEADINGPAIR) else {
        panic!("Heading pairs not decoded");
    };
    assert_eq!(hp.pairs, vec![("Title".to_string(), 1), ("Headings".to_string(), 2)]);
    assert_eq!(hp.parts_count(), 3);
    assert_eq!(ps.entries[1].size, Some(68));

    let Some(Property::Office(OfficeProperty::VtDocParts(dp))) = ps.get(PIDDSI_DOCPARTS) else {
        panic!("Doc parts not decoded");
    };
    assert_eq!(dp.parts, ["Doc1", "A", "Intro"]);
    assert_eq!(ps.entries[2].size, Some(36));

    let Some(Property::Office(OfficeProperty::VtHyperlinks(hl))) = ps.get(PIDDSI_HLINKS) else {
        panic!("Hyperlinks not decoded");
    };
    assert_eq!(
        hl.hyperlinks,
        vec![VtHyperlink {
            hash: 0x44332211,
            app: 0,
            office_art: 0,
            info: 1,
            hlink1: "http://a.b/".to_string(),
            hlink2: String::new(),
        }]
    );

    let Some(Property::Office(OfficeProperty::VtDigSig(ds))) = ps.get(PIDDSI_DIGSIG) else {
        panic!("DigSig not decoded");
    };
    assert_eq!(ds.sig_info.signature.as_deref(), Some([0x30, 0x82].as_slice()));
    assert_eq!(ds.sig_info.cert_store, Some(Vec::new()));
    assert_eq!(ds.sig_info.project_name.as_deref(), Some("VB"));
    assert_eq!(ds.sig_info.timestamp_url.as_deref(), Some(""));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn doc_parts_packing() -> Result<(), io::Error> {
    let config = Config::default();
    // Office writes the part names without padding between them
    let packed = vec![
        0x1e, 0x10, 0x00, 0x00, // VT_VECTOR | VT_LPSTR
        0x02, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00, b'D', b'o', b'c', b'1', 0x00,
        0x02, 0x00, 0x00, 0x00, b'A', 0x00,
        0x00, // padding
    ];
    let stream = build_stream(
        &FMTID_DOC_SUMMARY_INFORMATION,
        &[cp1252(), (PIDDSI_DOCPARTS, packed.clone())],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    let Some(Property::Office(OfficeProperty::VtDocParts(dp))) = ps.get(PIDDSI_DOCPARTS) else {
        panic!("Doc parts not decoded");
    };
    assert_eq!(dp.parts, ["Doc1", "A"]);

    // The generic decoder expects padded strings and misreads the second size
    let mut reader = Cursor::new(&packed[4..]);
    let value = TypedPropertyValue::read_value(&mut reader, VT_VECTOR | VT_LPSTR, 1252, true, &config)?;
    let TypedPropertyValue::Vector(v) = value else {
        panic!("Invalid value");
    };
    assert_eq!(v.data.len(), 1);
    assert_eq!(v.data[0].as_string().as_deref(), Some("Doc1"));
    assert!(v.truncated);

    // Padded strings outside of DocumentSummaryInformation take the generic path
    let padded = vec![
        0x1e, 0x10, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00, b'D', b'o', b'c', b'1', 0x00, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00, b'A', 0x00, 0x00, 0x00,
    ];
    let stream = build_stream(
        &FMTID_SUMMARY_INFORMATION,
        &[cp1252(), (PIDDSI_DOCPARTS, padded)],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    let Some(Property::TypedPropertyValue(TypedPropertyValue::Vector(v))) = ps.get(PIDDSI_DOCPARTS) else {
        panic!("Vector expected");
    };
    let strings: Vec<String> = v.data.iter().filter_map(|s| s.as_string()).collect();
    assert_eq!(strings, ["Doc1", "A"]);
    assert!(!v.truncated);
    assert_eq!(ps.entries[1].size, Some(28));
    Ok(())
}

#[test]
#[rustfmt::skip]
fn overlay_fallback() -> Result<(), io::Error> {
    // 5 hyperlink elements cannot form whole links: the generic blob is kept
    let stream = build_stream(
        &FMTID_DOC_SUMMARY_INFORMATION,
        &[
            cp1252(),
            (PIDDSI_HLINKS, vec![
                0x41, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
                0x05, 0x00, 0x00, 0x00,
            ]),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    let Some(Property::TypedPropertyValue(TypedPropertyValue::Blob(blob))) = ps.get(PIDDSI_HLINKS) else {
        panic!("Blob expected");
    };
    assert_eq!(blob.bytes, [5, 0, 0, 0]);
    assert!(!ps.is_partial());
    Ok(())
}

#[test]
#[rustfmt::skip]
fn user_defined_hyperlinks() -> Result<(), io::Error> {
    let dictionary = vec![
        0x01, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x00,
        b'_', b'P', b'I', b'D', b'_', b'H', b'L', b'I', b'N', b'K', b'S', 0x00,
    ];
    let hlinks = vec![
        0x41, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ];
    let stream = build_stream(
        &FMTID_USER_DEFINED_PROPERTIES,
        &[cp1252(), (PID_DICTIONARY, dictionary), (0x02, hlinks)],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let ps = &oleps.property_sets()[0];
    assert_eq!(ps.dictionary().and_then(|d| d.name_of(2)).as_deref(), Some(PID_HLINKS_NAME));
    let Some(Property::Office(OfficeProperty::VtHyperlinks(hl))) = ps.get(2) else {
        panic!("Hyperlinks not decoded");
    };
    assert!(hl.hyperlinks.is_empty());
    Ok(())
}

#[test]
fn serialization() -> Result<(), io::Error> {
    let stream = build_stream(
        &FMTID_USER_DEFINED_PROPERTIES,
        &[
            cp1252(),
            (
                0x02,
                vec![0x41, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0xca, 0xfe, 0x00, 0x00],
            ),
        ],
    );
    let oleps = OlePS::new(&mut Cursor::new(&stream))?;
    let json = serde_json::to_value(oleps.property_sets()).map_err(io::Error::other)?;
    assert_eq!(
        json[0]["fmtid"],
        serde_json::json!("d5cdd505-2e9c-101b-9397-08002b2cf9ae")
    );
    assert_eq!(
        json[0]["entries"][1]["property"]["TypedPropertyValue"]["Blob"]["bytes"],
        serde_json::json!("cafe")
    );
    Ok(())
}
