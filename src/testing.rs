//! Test doubles and provider-shaped fixtures.

use crate::engine::{
    EngineError, FormatEngine, MetadataMap, SubDataset, VectorSource, VectorTranslate,
};
use crate::network::client::Network;
use crate::network::error::NetworkError;
use crate::wfs::catalog::{apply_sample, parse_stored_queries, SampleResponse};
use crate::wfs::stored_query::StoredQuery;
use crate::xml::XmlElement;
use async_trait::async_trait;
use gdal::errors::GdalError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub(crate) const ENFUSER_ID: &str = "fmi::forecast::enfuser::airquality::helsinki-metropolitan::grid";
pub(crate) const AIR_QUALITY_ID: &str = "fmi::observations::airquality::hourly::simple";

pub(crate) fn metadata_map(entries: &[(&str, &str)]) -> MetadataMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn listed_query(id: &str) -> StoredQuery {
    parse_stored_queries(DESCRIBE_STORED_QUERIES_XML)
        .unwrap()
        .queries
        .into_iter()
        .find(|q| q.id == id)
        .unwrap()
}

pub(crate) fn air_quality_query() -> StoredQuery {
    listed_query(AIR_QUALITY_ID)
}

/// The Enfuser grid query as it looks after expansion, without any bound values.
pub(crate) fn expanded_enfuser_query() -> StoredQuery {
    let mut query = listed_query(ENFUSER_ID);
    let root = XmlElement::parse(ENFUSER_SAMPLE_XML).unwrap();
    apply_sample(&mut query, &SampleResponse::from_xml(&root, ENFUSER_ID).unwrap());
    query
}

enum Reply {
    Body { data: Vec<u8>, name: String },
    Status { status: u16, reason: String, body: String },
}

/// Answers requests whose URL contains a registered pattern. The first
/// matching pattern wins; anything else is a 404.
#[derive(Default)]
pub(crate) struct FakeNetwork {
    replies: Vec<(String, Reply)>,
    requests: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, pattern: &str, body: &str) -> Self {
        self.respond_file(pattern, body.as_bytes().to_vec(), "download")
    }

    pub(crate) fn respond_file(mut self, pattern: &str, data: Vec<u8>, name: &str) -> Self {
        self.replies.push((
            pattern.to_string(),
            Reply::Body {
                data,
                name: name.to_string(),
            },
        ));
        self
    }

    pub(crate) fn fail(mut self, pattern: &str, status: u16, reason: &str, body: &str) -> Self {
        self.replies.push((
            pattern.to_string(),
            Reply::Status {
                status,
                reason: reason.to_string(),
                body: body.to_string(),
            },
        ));
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn reply(&self, uri: &str) -> Result<(Vec<u8>, String), NetworkError> {
        self.requests.lock().unwrap().push(uri.to_string());
        let reply = self
            .replies
            .iter()
            .find(|(pattern, _)| uri.contains(pattern.as_str()))
            .map(|(_, reply)| reply);
        match reply {
            Some(Reply::Body { data, name }) => Ok((data.clone(), name.clone())),
            Some(Reply::Status {
                status,
                reason,
                body,
            }) => Err(NetworkError::HttpStatus {
                url: uri.to_string(),
                status: *status,
                reason: reason.clone(),
                body: body.clone(),
            }),
            None => Err(NetworkError::HttpStatus {
                url: uri.to_string(),
                status: 404,
                reason: "Not Found".to_string(),
                body: String::new(),
            }),
        }
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, uri: &str) -> Result<String, NetworkError> {
        let (data, _) = self.reply(uri)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    async fn fetch_raw(&self, uri: &str) -> Result<(Vec<u8>, String), NetworkError> {
        self.reply(uri)
    }

    async fn download_to_file(
        &self,
        uri: &str,
        dir: &Path,
        output_name: Option<&str>,
    ) -> Result<PathBuf, NetworkError> {
        let (data, name) = self.reply(uri)?;
        let path = dir.join(output_name.unwrap_or(&name));
        std::fs::write(&path, data).map_err(|e| NetworkError::DownloadIo(path.clone(), e))?;
        Ok(path)
    }
}

/// Scripted [`FormatEngine`]. Unknown URIs have no sub-datasets and empty
/// metadata. Conversions write an empty output file and are recorded.
#[derive(Default)]
pub(crate) struct FakeEngine {
    sub_datasets: HashMap<String, Vec<SubDataset>>,
    metadata: HashMap<String, MetadataMap>,
    band_metadata: HashMap<String, MetadataMap>,
    vectors: HashMap<PathBuf, VectorSource>,
    any_vector: Option<VectorSource>,
    translated_vector: Option<VectorSource>,
    no_vector_drivers: bool,
    vector_translation_error: Option<String>,
    raster_writes: Mutex<Vec<(String, PathBuf, MetadataMap)>>,
    vector_writes: Mutex<Vec<(PathBuf, PathBuf, VectorTranslate)>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_sub_datasets(mut self, uri: &str, subs: Vec<SubDataset>) -> Self {
        self.sub_datasets.insert(uri.to_string(), subs);
        self
    }

    pub(crate) fn with_metadata(mut self, uri: &str, metadata: MetadataMap) -> Self {
        self.metadata.insert(uri.to_string(), metadata);
        self
    }

    pub(crate) fn with_band_metadata(mut self, uri: &str, metadata: MetadataMap) -> Self {
        self.band_metadata.insert(uri.to_string(), metadata);
        self
    }

    pub(crate) fn with_vector(mut self, path: &Path, source: VectorSource) -> Self {
        self.vectors.insert(path.to_path_buf(), source);
        self
    }

    /// Layout returned for vector paths not registered with `with_vector`.
    pub(crate) fn with_any_vector(mut self, source: VectorSource) -> Self {
        self.any_vector = Some(source);
        self
    }

    pub(crate) fn with_translated_vector(mut self, source: VectorSource) -> Self {
        self.translated_vector = Some(source);
        self
    }

    pub(crate) fn without_vector_drivers(mut self) -> Self {
        self.no_vector_drivers = true;
        self
    }

    /// Vector conversions fail with `message` and write nothing.
    pub(crate) fn failing_vector_translation(mut self, message: &str) -> Self {
        self.vector_translation_error = Some(message.to_string());
        self
    }

    pub(crate) fn raster_writes(&self) -> Vec<(String, PathBuf, MetadataMap)> {
        self.raster_writes.lock().unwrap().clone()
    }

    pub(crate) fn vector_writes(&self) -> Vec<(PathBuf, PathBuf, VectorTranslate)> {
        self.vector_writes.lock().unwrap().clone()
    }
}

fn touch(path: &Path) -> Result<(), EngineError> {
    std::fs::write(path, b"").map_err(|e| EngineError::Write {
        path: path.to_path_buf(),
        source: GdalError::NullPointer {
            method_name: "GDALCreateCopy",
            msg: e.to_string(),
        },
    })
}

impl FormatEngine for FakeEngine {
    fn sub_datasets(&self, uri: &str) -> Result<Vec<SubDataset>, EngineError> {
        Ok(self.sub_datasets.get(uri).cloned().unwrap_or_default())
    }

    fn metadata(&self, uri: &str) -> Result<MetadataMap, EngineError> {
        Ok(self.metadata.get(uri).cloned().unwrap_or_default())
    }

    fn band_metadata(&self, uri: &str, _band: u32) -> Result<MetadataMap, EngineError> {
        Ok(self.band_metadata.get(uri).cloned().unwrap_or_default())
    }

    fn translate_raster(
        &self,
        src_uri: &str,
        dst: &Path,
        metadata: &MetadataMap,
    ) -> Result<(), EngineError> {
        self.raster_writes.lock().unwrap().push((
            src_uri.to_string(),
            dst.to_path_buf(),
            metadata.clone(),
        ));
        touch(dst)
    }

    fn has_vector_driver(&self, _name: &str) -> Result<bool, EngineError> {
        Ok(!self.no_vector_drivers)
    }

    fn open_vector(&self, path: &Path) -> Result<VectorSource, EngineError> {
        self.vectors
            .get(path)
            .or(self.any_vector.as_ref())
            .cloned()
            .ok_or_else(|| EngineError::Open {
                uri: path.display().to_string(),
                source: GdalError::NullPointer {
                    method_name: "GDALOpenEx",
                    msg: format!("{}: No such file or directory", path.display()),
                },
            })
    }

    fn translate_vector(
        &self,
        src: &Path,
        dst: &Path,
        request: &VectorTranslate,
    ) -> Result<VectorSource, EngineError> {
        self.vector_writes.lock().unwrap().push((
            src.to_path_buf(),
            dst.to_path_buf(),
            request.clone(),
        ));
        if let Some(message) = &self.vector_translation_error {
            return Err(EngineError::VectorTranslate {
                src: src.to_path_buf(),
                message: message.clone(),
            });
        }
        touch(dst)?;
        Ok(self.translated_vector.clone().unwrap_or_default())
    }
}

pub(crate) const EXCEPTION_REPORT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ExceptionReport xmlns="http://www.opengis.net/ows/1.1"
		 xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xsi:schemaLocation="http://www.opengis.net/ows/1.1 http://schemas.opengis.net/ows/1.1.0/owsExceptionReport.xsd"
  version="2.0.0" xml:lang="eng">


  <Exception exceptionCode="OperationParsingFailed">
    <ExceptionText>Invalid time interval!</ExceptionText>
    <ExceptionText>The start time is later than the end time.</ExceptionText>
    <ExceptionText>URI: /wfs?bbox=21.0%2C59.7%2C31.7%2C70.0&amp;endtime=2020-11-06T11%3A00%3A00Z&amp;request=GetFeature&amp;service=WFS&amp;storedquery_id=fmi%3A%3Aobservations%3A%3Aairquality%3A%3Ahourly%3A%3Asimple&amp;timestep=60&amp;version=2.0.0</ExceptionText>

  </Exception>

</ExceptionReport>
"#;

pub(crate) const DESCRIBE_STORED_QUERIES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeStoredQueriesResponse xmlns="http://www.opengis.net/wfs/2.0"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:omso="http://inspire.ec.europa.eu/schemas/omso/3.0">
  <StoredQueryDescription id="fmi::avi::observations::iwxxm">
    <Title>Aviation Observations</Title>
    <Abstract>Aviation weather observation messages in IWXXM format.</Abstract>
    <Parameter name="starttime" type="dateTime">
      <Title>Begin of the time interval</Title>
      <Abstract>Parameter begin specifies the begin of time interval in ISO-format.</Abstract>
    </Parameter>
  </StoredQueryDescription>
  <StoredQueryDescription id="fmi::forecast::enfuser::airquality::helsinki-metropolitan::grid">
    <Title>FMI-ENFUSER air quality forecast as grid</Title>
    <Abstract>Air quality forecast for the Helsinki metropolitan area in a 20m grid.</Abstract>
    <Parameter name="starttime" type="dateTime">
      <Title>Begin of the time interval</Title>
      <Abstract>Parameter begin specifies the begin of time interval in ISO-format (for example 2012-02-27T00:00:00Z).</Abstract>
    </Parameter>
    <Parameter name="endtime" type="dateTime">
      <Title>End of time interval</Title>
      <Abstract>End of time interval in ISO-format (for example 2012-02-27T00:00:00Z).</Abstract>
    </Parameter>
    <Parameter name="bbox" type="xsi:string">
      <Title>Bounding box of area for which to return data.</Title>
      <Abstract>Bounding box of area for which to return data (lon,lat,lon,lat). For example 21,61,22,62</Abstract>
    </Parameter>
    <Parameter name="parameters" type="NameList">
      <Title>Parameters to return</Title>
      <Abstract>Comma separated list of meteorological parameters to return.</Abstract>
    </Parameter>
    <ReturnFeatureType>omso:GridSeriesObservation</ReturnFeatureType>
  </StoredQueryDescription>
  <StoredQueryDescription id="fmi::forecast::exotic::simple">
    <Title>Exotic forecast</Title>
    <Abstract>Forecast restricted to an envelope.</Abstract>
    <Parameter name="envelope" type="gml:Envelope">
      <Title>Envelope</Title>
      <Abstract>Area of interest.</Abstract>
    </Parameter>
  </StoredQueryDescription>
  <StoredQueryDescription id="fmi::observations::airquality::hourly::simple">
    <Title>Hourly air quality observations as simple features</Title>
    <Abstract>Hourly air quality observations from weather and air quality stations.</Abstract>
    <Parameter name="starttime" type="dateTime">
      <Title>Begin of the time interval</Title>
      <Abstract>Parameter begin specifies the begin of time interval in ISO-format.</Abstract>
    </Parameter>
    <Parameter name="endtime" type="dateTime">
      <Title>End of time interval</Title>
      <Abstract>End of time interval in ISO-format.</Abstract>
    </Parameter>
    <Parameter name="timestep" type="int">
      <Title>The time step of data in minutes</Title>
      <Abstract>The time step of data in minutes. Notice that timestep is calculated from start of the ongoing hour or day.</Abstract>
    </Parameter>
    <Parameter name="parameters" type="NameList">
      <Title>Parameters to return</Title>
      <Abstract>Comma separated list of air quality parameters to return.</Abstract>
    </Parameter>
    <Parameter name="crs" type="xsi:string">
      <Title>Coordinate projection to use in results</Title>
      <Abstract>Coordinate projection to use in results. For example EPSG::3067</Abstract>
    </Parameter>
    <Parameter name="bbox" type="xsi:string">
      <Title>Bounding box of area for which to return data.</Title>
      <Abstract>Bounding box of area for which to return data (lon,lat,lon,lat).</Abstract>
    </Parameter>
    <Parameter name="place" type="xsi:string">
      <Title>The location for which to provide data</Title>
      <Abstract>The location for which to provide data. Region can be given after location name separated by comma.</Abstract>
    </Parameter>
    <Parameter name="fmisid" type="integerList">
      <Title>FMI observation station identifier.</Title>
      <Abstract>Identifier of the observation station.</Abstract>
    </Parameter>
    <Parameter name="maxlocations" type="int">
      <Title>Amount of locations</Title>
      <Abstract>How many observation stations are fetched around queried locations.</Abstract>
    </Parameter>
    <Parameter name="geoid" type="integerList">
      <Title>Geoid of the location for which to return data.</Title>
      <Abstract>Geoid of the location for which to return data. (ID from geonames.org)</Abstract>
    </Parameter>
    <Parameter name="timezone" type="xsi:string">
      <Title>Time zone</Title>
      <Abstract>Time zone of the time instant of the data point in the form Area/Location (for example America/Costa_Rica).</Abstract>
    </Parameter>
  </StoredQueryDescription>
  <StoredQueryDescription id="GetFeatureById">
    <Title>GetFeatureById</Title>
    <Abstract>The GetFeatureById stored query is mandatory by WFS 2.0 spec.</Abstract>
    <Parameter name="id" type="xsi:string">
      <Title>Feature id</Title>
      <Abstract>Identifier of the feature.</Abstract>
    </Parameter>
  </StoredQueryDescription>
</DescribeStoredQueriesResponse>
"#;

pub(crate) const ENFUSER_SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection timeStamp="2020-11-05T18:42:13Z" numberMatched="2" numberReturned="2"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:om="http://www.opengis.net/om/2.0"
    xmlns:omso="http://inspire.ec.europa.eu/schemas/omso/3.0"
    xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:gmlcov="http://www.opengis.net/gmlcov/1.0"
    xmlns:xlink="http://www.w3.org/1999/xlink">
  <wfs:member>
    <omso:GridSeriesObservation gml:id="obs-obs-1-1">
      <om:phenomenonTime>
        <gml:TimePeriod gml:id="time1-1-1">
          <gml:beginPosition>2020-11-05T19:00:00Z</gml:beginPosition>
          <gml:endPosition>2020-11-06T11:00:00Z</gml:endPosition>
        </gml:TimePeriod>
      </om:phenomenonTime>
      <om:procedure xlink:href="http://xml.fmi.fi/inspire/process/enfuser_helsinki_metropolitan"/>
      <om:observedProperty xlink:href="https://opendata.fmi.fi/meta?observableProperty=forecast&amp;param=AQIndex,NO2Concentration,O3Concentration,PM10Concentration,PM25Concentration&amp;language=eng&amp;units=netcdf"/>
      <om:result>
        <gmlcov:RectifiedGridCoverage gml:id="cov-1-1">
          <gml:rangeSet>
            <gml:File>
              <gml:rangeParameters/>
              <gml:fileReference>https://opendata.fmi.fi/download?producer=enfuser_helsinki_metropolitan&amp;param=AQIndex,NO2Concentration,O3Concentration,PM10Concentration,PM25Concentration&amp;bbox=24.58,60.1,25.2,60.4&amp;levels=0&amp;origintime=2020-11-05T18:00:00Z&amp;starttime=2020-11-05T19:00:00Z&amp;endtime=2020-11-06T11:00:00Z&amp;format=netcdf&amp;projection=EPSG:4326</gml:fileReference>
              <gml:fileStructure>Record Interleaved</gml:fileStructure>
            </gml:File>
          </gml:rangeSet>
        </gmlcov:RectifiedGridCoverage>
      </om:result>
    </omso:GridSeriesObservation>
  </wfs:member>
  <wfs:member>
    <omso:GridSeriesObservation gml:id="obs-obs-1-2">
      <om:procedure xlink:href="http://xml.fmi.fi/inspire/process/enfuser_helsinki_metropolitan"/>
      <om:observedProperty xlink:href="https://opendata.fmi.fi/meta?observableProperty=forecast&amp;param=AQIndex,NO2Concentration,O3Concentration,PM10Concentration,PM25Concentration&amp;language=eng&amp;units=netcdf"/>
      <om:result>
        <gmlcov:RectifiedGridCoverage gml:id="cov-1-2">
          <gml:rangeSet>
            <gml:File>
              <gml:fileReference>https://opendata.fmi.fi/download?producer=enfuser_helsinki_metropolitan&amp;param=AQIndex,NO2Concentration,O3Concentration,PM10Concentration,PM25Concentration&amp;bbox=24.58,60.1,25.2,60.4&amp;levels=0&amp;origintime=2020-11-05T18:00:00Z&amp;starttime=2020-11-05T19:00:00Z&amp;endtime=2020-11-06T11:00:00Z&amp;format=netcdf&amp;projection=EPSG:4326</gml:fileReference>
            </gml:File>
          </gml:rangeSet>
        </gmlcov:RectifiedGridCoverage>
      </om:result>
    </omso:GridSeriesObservation>
  </wfs:member>
</wfs:FeatureCollection>
"#;

pub(crate) const OBSERVABLE_PROPERTY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CompositeObservableProperty xmlns="http://inspire.ec.europa.eu/schemas/omop/2.9"
    xmlns:gml="http://www.opengis.net/gml/3.2" gml:id="observableProperties" componentCount="5">
  <component>
    <ObservableProperty gml:id="aqindex">
      <label>Air quality index</label>
      <basePhenomenon>Air quality index</basePhenomenon>
    </ObservableProperty>
  </component>
  <component>
    <ObservableProperty gml:id="no2concentration">
      <label>Nitrogen dioxide concentration</label>
      <basePhenomenon>Nitrogen dioxide</basePhenomenon>
    </ObservableProperty>
  </component>
  <component>
    <ObservableProperty gml:id="o3concentration">
      <label>Ozone concentration</label>
      <basePhenomenon>Ozone</basePhenomenon>
    </ObservableProperty>
  </component>
  <component>
    <ObservableProperty gml:id="pm10concentration">
      <label>Particulate matter &lt; 10 µm</label>
      <basePhenomenon>Particulate matter</basePhenomenon>
    </ObservableProperty>
  </component>
  <component>
    <ObservableProperty gml:id="pm25concentration">
      <label>Particulate matter &lt; 2.5 µm</label>
      <basePhenomenon>Particulate matter</basePhenomenon>
    </ObservableProperty>
  </component>
</CompositeObservableProperty>
"#;
