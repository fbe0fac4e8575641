use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{DefaultDicomObject, FileDicomObject, FileMetaTable};
use std::fs;
use std::path::Path;

pub(crate) fn make_file_meta() -> FileMetaTable {
    FileMetaTableBuilder::new()
        .media_storage_sop_class_uid("1.2.3")
        .media_storage_sop_instance_uid("2.3.4")
        .transfer_syntax("1.2.840.10008.1.2.1") // Explicit VR Little Endian
        .build()
        .unwrap()
}

pub(crate) fn make_dicom_object(elements: &[(Tag, VR, &str)]) -> DefaultDicomObject {
    let mut obj = FileDicomObject::new_empty_with_meta(make_file_meta());
    for &(tag, vr, value) in elements {
        obj.put(DataElement::new::<PrimitiveValue>(
            tag,
            vr,
            PrimitiveValue::from(value),
        ));
    }
    obj
}

pub(crate) fn write_dicom_file(path: &Path, elements: &[(Tag, VR, &str)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    make_dicom_object(elements).write_to_file(path).unwrap();
}
