//! Master and update documents for tests

use std::fmt::Write as _;

/// Serial of the primary fixture device
pub const DEVICE_SERIAL: &str = "001";
/// Channel of the primary fixture device
pub const CHANNEL: &str = "ch0000";
/// Datapoint whose value the fixtures change
pub const DATAPOINT: &str = "idp0000";

/// Number of filler strings, enough to push the document past the master threshold
const FILLER_STRINGS: usize = 300;

/// Master document with:
///
/// - device `001` (ready) with channel `ch0000`, datapoint `idp0000 = "1"`,
///   output `odp0000 = "0"` and parameter `pm0000 = "10"`
/// - device `002` not yet commissioned
/// - scene `FFFF0001`
/// - one floor with one room and a channel description for pairing ids
#[must_use]
pub fn master_xml() -> String {
    let mut strings = String::from(r#"<string nameId="0001">Switch actuator</string>"#);
    for i in 0..FILLER_STRINGS {
        let _ = write!(strings, r#"<string nameId="f{i:04}">filler entry number {i}</string>"#);
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project>
  <strings>{strings}</strings>
  <floorplan>
    <floor uid="01" name="Ground floor"><room uid="01" name="Kitchen"/></floor>
  </floorplan>
  <descriptions>
    <channelDescription cid="ABB5000">
      <inputs><dataPoint i="idp0000" pairingId="1"/></inputs>
      <outputs><dataPoint i="odp0000" pairingId="256"/></outputs>
    </channelDescription>
  </descriptions>
  <devices>
    <device serialNumber="{DEVICE_SERIAL}" deviceId="B002" nameId="0001" commissioningState="ready">
      <channels>
        <channel i="{CHANNEL}" cid="ABB5000">
          <attribute name="displayName">Kitchen light</attribute>
          <attribute name="floor">01</attribute>
          <attribute name="room">01</attribute>
          <attribute name="iconId">3</attribute>
          <attribute name="functionId">7</attribute>
          <inputs><dataPoint i="{DATAPOINT}"><value>1</value></dataPoint></inputs>
          <outputs>
            <dataPoint i="odp0000"><value>0</value></dataPoint>
            <dataPoint i="odp0001"><value></value></dataPoint>
            <dataPoint i="odp0002"><value>1<b/></value></dataPoint>
          </outputs>
          <parameters><parameter i="pm0000"><value>10</value></parameter></parameters>
        </channel>
      </channels>
    </device>
    <device serialNumber="002" deviceId="B003" nameId="0001" commissioningState="unknown">
      <channels><channel i="ch0000"><inputs><dataPoint i="idp0000"><value>1</value></dataPoint></inputs></channel></channels>
    </device>
    <device serialNumber="FFFF0001" commissioningState="ready"/>
  </devices>
</project>"#
    )
}

/// Update fragment setting one datapoint on a ready device
#[must_use]
pub fn update_xml(serial: &str, channel: &str, datapoint: &str, value: &str) -> String {
    format!(
        r#"<project type="update"><devices><device serialNumber="{serial}" commissioningState="ready"><channels><channel i="{channel}"><inputs><dataPoint i="{datapoint}"><value>{value}</value></dataPoint></inputs></channel></channels></device></devices></project>"#
    )
}
